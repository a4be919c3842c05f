//! Intent routing
//!
//! Converts a free-text question into exactly one structured operation.
//! Two layered strategies: model-assisted classification when a chat
//! model is configured, deterministic keyword matching as the fallback
//! and as the sole strategy otherwise. The router never returns an
//! error and never emits a partially specified call.

use crate::llm::ChatClient;
use crate::models::{ChatMessage, ConversationState, Operation, ToolCall, DEFAULT_PERIOD};
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Identifier keyword groups, checked in order; first match wins.
/// Named-entity keywords sit ahead of the numeric codes on purpose.
const IDENTIFIER_KEYWORDS: &[(&[&str], &str)] = &[
    (&["茅台", "600519"], "600519.SH"),
    (&["平安", "000001"], "000001.SZ"),
    (&["招商", "600036"], "600036.SH"),
    (&["万科", "000002"], "000002.SZ"),
];

const DEFAULT_STOCK_CODE: &str = "000001.SZ";

/// Operation keyword groups, checked in order; a query matching several
/// groups resolves to the first group tested, not the most specific.
const REALTIME_KEYWORDS: &[&str] = &["实时", "当前", "现在", "最新"];
const PRICE_KEYWORDS: &[&str] = &["价格", "股价", "走势", "k线", "行情"];
const FINANCIAL_KEYWORDS: &[&str] = &["财务", "指标", "业绩", "盈利", "收益"];

pub struct IntentRouter {
    chat: Option<Arc<ChatClient>>,
}

impl IntentRouter {
    pub fn new(chat: Option<Arc<ChatClient>>) -> Self {
        Self { chat }
    }

    /// Resolve one complete tool call for the query. Model-assisted
    /// classification runs first when available; any failure there falls
    /// through to the keyword strategy without surfacing an error.
    pub async fn route(&self, query: &str, history: &ConversationState) -> ToolCall {
        if let Some(chat) = &self.chat {
            match self.classify_with_model(chat, query, history).await {
                Ok(call) => {
                    debug!(operation = %call.operation, "model-assisted classification");
                    return call;
                }
                Err(e) => {
                    debug!(error = %e, "model classification failed, using keywords");
                }
            }
        }

        let call = Self::classify_by_keywords(query);
        debug!(operation = %call.operation, "keyword classification");
        call
    }

    async fn classify_with_model(
        &self,
        chat: &ChatClient,
        query: &str,
        history: &ConversationState,
    ) -> Result<ToolCall> {
        let mut catalogue = String::new();
        for op in Operation::ALL {
            catalogue.push_str(&format!("- {}: {}\n", op.wire_name(), op.description()));
        }

        let mut messages = vec![
            ChatMessage::system(
                "你是股票查询助手的意图分类器。根据用户问题选择一个工具并给出股票代码。\
                 只返回JSON，不要解释。格式：{\"operation\": \"<工具名>\", \"stock_code\": \"<ts_code>\"}",
            ),
            ChatMessage::user(format!("可用工具：\n{}", catalogue)),
        ];

        // Recent turns give the classifier follow-up context
        for turn in history.turns().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
            messages.push(ChatMessage::user(format!("此前问题：{}", turn.query)));
        }
        messages.push(ChatMessage::user(format!("用户问题：{}", query)));

        let reply = chat.complete(&messages).await?;
        parse_route_reply(&reply)
    }

    /// Deterministic keyword classification, always available
    pub fn classify_by_keywords(query: &str) -> ToolCall {
        let lowered = query.to_lowercase();

        let stock_code = IDENTIFIER_KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
            .map(|(_, code)| *code)
            .unwrap_or(DEFAULT_STOCK_CODE);

        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        let operation = if has_any(REALTIME_KEYWORDS) {
            Operation::RealtimePrice
        } else if has_any(PRICE_KEYWORDS) {
            Operation::HistoricalPrice
        } else if has_any(FINANCIAL_KEYWORDS) {
            Operation::FinancialIndicator
        } else {
            // 信息/基本/概况/介绍/公司 keywords and anything unmatched
            Operation::BasicInfo
        };

        build_call(operation, stock_code)
    }
}

/// Parse the structured fragment out of a model reply. Markdown fences
/// are tolerated; anything else fails the model strategy.
fn parse_route_reply(reply: &str) -> Result<ToolCall> {
    let cleaned = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: Value = serde_json::from_str(cleaned).map_err(|e| {
        crate::error::AgentError::GenerationError(format!(
            "unparseable routing reply: {} | raw={}",
            e, reply
        ))
    })?;

    let name = parsed
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            crate::error::AgentError::GenerationError("routing reply missing operation".to_string())
        })?;

    let operation = Operation::from_wire_name(name).ok_or_else(|| {
        crate::error::AgentError::GenerationError(format!("'{}' is not a known operation", name))
    })?;

    let stock_code = parsed
        .get("stock_code")
        .and_then(Value::as_str)
        .filter(|code| !code.trim().is_empty())
        .unwrap_or(DEFAULT_STOCK_CODE);

    Ok(build_call(operation, stock_code))
}

/// Populate every argument the operation's schema declares
fn build_call(operation: Operation, stock_code: &str) -> ToolCall {
    let mut arguments = Map::new();
    arguments.insert("stock_code".to_string(), json!(stock_code));
    if operation == Operation::FinancialIndicator {
        arguments.insert("period".to_string(), json!(DEFAULT_PERIOD));
    }
    ToolCall::new(operation, arguments)
}
