//! Core data models for the stock query agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Default reporting period for financial indicator lookups
pub const DEFAULT_PERIOD: &str = "20231231";

//
// ================= Operation =================
//

/// Closed set of data lookups the agent can run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BasicInfo,
    HistoricalPrice,
    RealtimePrice,
    FinancialIndicator,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::BasicInfo,
        Operation::HistoricalPrice,
        Operation::RealtimePrice,
        Operation::FinancialIndicator,
    ];

    /// Name the operation is registered and dispatched under
    pub fn wire_name(&self) -> &'static str {
        match self {
            Operation::BasicInfo => "get_stock_basic",
            Operation::HistoricalPrice => "get_stock_price",
            Operation::RealtimePrice => "get_realtime_price",
            Operation::FinancialIndicator => "get_financial_indicator",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::BasicInfo => "获取股票基本信息",
            Operation::HistoricalPrice => "获取股票历史价格数据",
            Operation::RealtimePrice => "获取股票实时报价",
            Operation::FinancialIndicator => "获取财务指标数据",
        }
    }

    /// Arguments that must be present before execution is attempted
    pub fn required_params(&self) -> &'static [&'static str] {
        &["stock_code"]
    }

    pub fn from_wire_name(name: &str) -> Option<Operation> {
        Operation::ALL.iter().copied().find(|op| op.wire_name() == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

//
// ================= Tool Call =================
//

/// A resolved operation with fully populated arguments.
/// The router never emits a partially specified call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub operation: Operation,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(operation: Operation, arguments: Map<String, Value>) -> Self {
        Self {
            operation,
            arguments,
        }
    }
}

//
// ================= Tool Result =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingArgument,
    UnknownTool,
    ToolInvocationError,
    MalformedResponse,
    GenerationError,
    Timeout,
}

/// Uniform outcome of one tool invocation; exactly one arm populated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    Success {
        payload: Value,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ToolResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ToolResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }
}

//
// ================= Conversation =================
//

/// One completed turn: what was asked, what ran, what was answered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub query: String,
    pub operation: Option<Operation>,
    pub result: Option<ToolResult>,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(
        query: String,
        operation: Option<Operation>,
        result: Option<ToolResult>,
        answer: String,
    ) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            query,
            operation,
            result,
            answer,
            created_at: Utc::now(),
        }
    }
}

/// Append-only transcript owned by exactly one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    turns: Vec<TurnRecord>,
}

impl ConversationState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Append a turn; records are never removed
    pub fn append(&mut self, record: TurnRecord) {
        self.turns.push(record);
        self.updated_at = Utc::now();
    }

    /// Append a record loaded from persistent storage
    pub fn append_existing(&mut self, record: TurnRecord) {
        self.turns.push(record);
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &TurnRecord> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&TurnRecord> {
        self.turns.last()
    }
}

//
// ================= Chat Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Role-tagged message for the generation capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_wire_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_wire_name(op.wire_name()), Some(op));
        }
        assert_eq!(Operation::from_wire_name("get_weather"), None);
    }

    #[test]
    fn test_tool_result_arms() {
        let ok = ToolResult::Success {
            payload: json!([{"ts_code": "600519.SH"}]),
        };
        assert!(ok.is_success());

        let failed = ToolResult::failure(FailureKind::UnknownTool, "nope");
        assert!(!failed.is_success());
    }

    #[test]
    fn test_conversation_state_appends_monotonically() {
        let mut state = ConversationState::new("default");
        assert!(state.is_empty());

        state.append(TurnRecord::new(
            "贵州茅台的基本信息".to_string(),
            Some(Operation::BasicInfo),
            None,
            "…".to_string(),
        ));
        state.append(TurnRecord::new(
            "当前价格".to_string(),
            Some(Operation::RealtimePrice),
            None,
            "…".to_string(),
        ));

        assert_eq!(state.len(), 2);
        assert_eq!(state.last().map(|t| t.query.as_str()), Some("当前价格"));
    }

    #[test]
    fn test_chat_role_serialization() {
        let msg = ChatMessage::system("你是一个助手");
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"role\":\"system\""));
    }
}
