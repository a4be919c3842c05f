//! Tool execution boundary
//!
//! Validates calls against the operation schema, dispatches through the
//! registry, and normalizes every outcome into a ToolResult. No error
//! crosses this boundary; timeouts and a small transient-failure retry
//! are owned here and invisible to callers.

use crate::error::AgentError;
use crate::models::{FailureKind, ToolCall, ToolResult};
use crate::tools::ToolRegistry;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts per call; the second attempt is reserved for read-only tools
/// failing with a transient-looking error.
const MAX_ATTEMPTS: u32 = 2;

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Execute a call whose operation name has not been resolved yet.
    /// Names outside the closed enumeration fail before the registry is
    /// consulted.
    pub async fn execute_raw(&self, name: &str, arguments: &Map<String, Value>) -> ToolResult {
        match crate::models::Operation::from_wire_name(name) {
            Some(operation) => {
                self.execute(&ToolCall::new(operation, arguments.clone())).await
            }
            None => ToolResult::failure(
                FailureKind::UnknownTool,
                format!("'{}' is not a supported operation", name),
            ),
        }
    }

    /// Execute a resolved call. Always returns a ToolResult.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        // Schema validation before any dispatch; a miss here has zero
        // side effects.
        for param in call.operation.required_params() {
            if !call.arguments.contains_key(*param) {
                return ToolResult::failure(
                    FailureKind::MissingArgument,
                    format!("'{}' requires argument '{}'", call.operation, param),
                );
            }
        }

        let Some(tool) = self.registry.get(call.operation.wire_name()) else {
            return ToolResult::failure(
                FailureKind::UnknownTool,
                format!("'{}' is not registered", call.operation),
            );
        };

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;

            match tokio::time::timeout(self.timeout, tool.invoke(&call.arguments)).await {
                Ok(Ok(payload)) => break Ok(payload),
                Ok(Err(e)) => {
                    if attempt < MAX_ATTEMPTS && tool.read_only() && is_transient(&e) {
                        warn!(
                            tool = tool.name(),
                            attempt,
                            error = %e,
                            "transient tool failure, retrying"
                        );
                        continue;
                    }
                    break Err(e);
                }
                Err(_) => {
                    break Err(AgentError::Timeout(format!(
                        "'{}' did not answer within {:?}",
                        tool.name(),
                        self.timeout
                    )))
                }
            }
        };

        match outcome {
            Ok(payload) => {
                if payload_is_structured(&payload) {
                    debug!(tool = tool.name(), attempts = attempt, "tool succeeded");
                    ToolResult::Success { payload }
                } else {
                    ToolResult::failure(
                        FailureKind::MalformedResponse,
                        format!("'{}' returned an unstructured payload", call.operation),
                    )
                }
            }
            Err(e) => {
                warn!(tool = tool.name(), error = %e, "tool failed");
                ToolResult::failure(failure_kind(&e), e.to_string())
            }
        }
    }
}

/// Structured means an object or an array of records; a bare scalar is
/// not an interpretable provider reply.
fn payload_is_structured(payload: &Value) -> bool {
    payload.is_object() || payload.is_array()
}

fn failure_kind(error: &AgentError) -> FailureKind {
    match error {
        AgentError::MissingArgument(_) => FailureKind::MissingArgument,
        AgentError::UnknownTool(_) => FailureKind::UnknownTool,
        AgentError::MalformedResponse(_) | AgentError::SerializationError(_) => {
            FailureKind::MalformedResponse
        }
        AgentError::Timeout(_) => FailureKind::Timeout,
        _ => FailureKind::ToolInvocationError,
    }
}

fn is_transient(error: &AgentError) -> bool {
    match error {
        AgentError::HttpError(e) => e.is_connect() || e.is_timeout(),
        AgentError::ToolInvocationError(message) => {
            let message = message.to_lowercase();
            message.contains("connect")
                || message.contains("timed out")
                || message.contains("502")
                || message.contains("503")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use crate::tools::{create_mock_registry, MockDataTool, Tool};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn executor_with_mock() -> (ToolExecutor, Arc<AtomicUsize>) {
        let basic = MockDataTool::new(Operation::BasicInfo);
        let counter = basic.counter();

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(basic));

        (
            ToolExecutor::new(registry, Duration::from_secs(5)),
            counter,
        )
    }

    fn call_with_code(operation: Operation, stock_code: &str) -> ToolCall {
        let mut arguments = Map::new();
        arguments.insert("stock_code".to_string(), json!(stock_code));
        ToolCall::new(operation, arguments)
    }

    #[tokio::test]
    async fn test_missing_argument_short_circuits() {
        let (executor, counter) = executor_with_mock();

        let call = ToolCall::new(Operation::BasicInfo, Map::new());
        let result = executor.execute(&call).await;

        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: FailureKind::MissingArgument,
                ..
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_operation_name_never_reaches_registry() {
        let (executor, counter) = executor_with_mock();

        let mut arguments = Map::new();
        arguments.insert("stock_code".to_string(), json!("600519.SH"));
        let result = executor.execute_raw("get_weather", &arguments).await;

        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: FailureKind::UnknownTool,
                ..
            }
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_operation_fails() {
        let (executor, _) = executor_with_mock();

        // RealtimePrice is in the enumeration but not in this registry
        let result = executor
            .execute(&call_with_code(Operation::RealtimePrice, "600519.SH"))
            .await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: FailureKind::UnknownTool,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let executor = ToolExecutor::new(create_mock_registry(), Duration::from_secs(5));

        let result = executor
            .execute(&call_with_code(Operation::BasicInfo, "600519.SH"))
            .await;

        let ToolResult::Success { payload } = result else {
            panic!("expected success");
        };
        assert_eq!(payload[0]["name"], "贵州茅台");
    }

    struct ScalarTool;

    #[async_trait::async_trait]
    impl Tool for ScalarTool {
        fn name(&self) -> &'static str {
            Operation::BasicInfo.wire_name()
        }

        fn description(&self) -> &'static str {
            "returns a bare string"
        }

        async fn invoke(&self, _arguments: &Map<String, Value>) -> crate::Result<Value> {
            Ok(json!("not a record set"))
        }
    }

    #[tokio::test]
    async fn test_unstructured_payload_is_malformed() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ScalarTool));
        let executor = ToolExecutor::new(registry, Duration::from_secs(5));

        let result = executor
            .execute(&call_with_code(Operation::BasicInfo, "600519.SH"))
            .await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: FailureKind::MalformedResponse,
                ..
            }
        ));
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            Operation::BasicInfo.wire_name()
        }

        fn description(&self) -> &'static str {
            "never answers in time"
        }

        async fn invoke(&self, _arguments: &Map<String, Value>) -> crate::Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!([]))
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_typed_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let executor = ToolExecutor::new(registry, Duration::from_millis(20));

        let result = executor
            .execute(&call_with_code(Operation::BasicInfo, "600519.SH"))
            .await;
        assert!(matches!(
            result,
            ToolResult::Failure {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }

    struct FlakyTool {
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            Operation::BasicInfo.wire_name()
        }

        fn description(&self) -> &'static str {
            "fails once with a transient error, then succeeds"
        }

        async fn invoke(&self, _arguments: &Map<String, Value>) -> crate::Result<Value> {
            if self.invocations.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AgentError::ToolInvocationError(
                    "data gateway returned 503 for stock_basic".to_string(),
                ))
            } else {
                Ok(json!([{"ts_code": "600519.SH"}]))
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FlakyTool {
            invocations: invocations.clone(),
        }));
        let executor = ToolExecutor::new(registry, Duration::from_secs(5));

        let result = executor
            .execute(&call_with_code(Operation::BasicInfo, "600519.SH"))
            .await;

        assert!(result.is_success());
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }
}
