//! Response synthesis
//!
//! Converts a structured tool result (or failure) plus the original
//! query into the final natural-language answer. Failures never reach
//! the chat model; generation failures fall back to the canonical
//! serialization of the payload, and nothing raises past this boundary.

use crate::llm::ChatClient;
use crate::models::{ChatMessage, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub struct ResponseSynthesizer {
    chat: Option<Arc<ChatClient>>,
}

impl ResponseSynthesizer {
    pub fn new(chat: Option<Arc<ChatClient>>) -> Self {
        Self { chat }
    }

    pub async fn synthesize(&self, query: &str, result: &ToolResult) -> String {
        match result {
            ToolResult::Failure { message, .. } => format!("查询失败：{}", message),
            ToolResult::Success { payload } => self.render_success(query, payload).await,
        }
    }

    async fn render_success(&self, query: &str, payload: &Value) -> String {
        let canonical = canonical_payload(payload);

        let Some(chat) = &self.chat else {
            return canonical;
        };

        let messages = vec![
            ChatMessage::system("请将股票数据结果转化为用户容易理解的自然语言描述。"),
            ChatMessage::user(format!("用户问题：{}", query)),
            ChatMessage::user(format!("原始数据：{}", canonical)),
            ChatMessage::user("请用中文回答，突出重点信息。"),
        ];

        match chat.complete(&messages).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "generation failed, returning raw payload");
                canonical
            }
        }
    }
}

/// Canonical serialization of a payload, used verbatim both inside the
/// generation prompt and as the deterministic fallback answer.
pub fn canonical_payload(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_failure_renders_fixed_format() {
        let synthesizer = ResponseSynthesizer::new(None);
        let result = ToolResult::failure(FailureKind::Timeout, "行情接口超时");

        let answer = synthesizer.synthesize("茅台的实时价格", &result).await;
        assert_eq!(answer, "查询失败：行情接口超时");
    }

    #[tokio::test]
    async fn test_fallback_is_byte_equal_to_canonical_payload() {
        let synthesizer = ResponseSynthesizer::new(None);
        let payload = json!([{
            "ts_code": "600519.SH",
            "name": "贵州茅台",
            "price": 1675.5,
        }]);
        let result = ToolResult::Success {
            payload: payload.clone(),
        };

        let answer = synthesizer.synthesize("茅台的实时价格", &result).await;
        assert_eq!(answer, canonical_payload(&payload));
    }
}
