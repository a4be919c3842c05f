//! Tool trait and registry
//!
//! Tools are thin, read-only wrappers around the Tushare data gateway.
//! The registry is a pure lookup table; all policy lives in the executor.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::{Operation, DEFAULT_PERIOD};
use crate::Result;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Read-only tools may be retried after a transient failure
    fn read_only(&self) -> bool {
        true
    }
    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value>;
}

/// Tool registry for looking up tools by wire name
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Data Gateway Client =================
//

/// HTTP client for the Tushare data gateway.
/// Every API shares one POST envelope: {api_name, token, params, fields}.
#[derive(Clone)]
pub struct TushareClient {
    client: Client,
    token: String,
    base_url: String,
}

impl TushareClient {
    pub fn new(token: String, base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Call one gateway API and flatten its columnar reply into records
    pub async fn call(&self, api_name: &str, params: Value) -> Result<Value> {
        let body = json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": "",
        });

        let response = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout(format!("data gateway request timed out for {}", api_name))
                } else {
                    AgentError::ToolInvocationError(format!(
                        "data gateway request failed for {}: {}",
                        api_name, e
                    ))
                }
            })?;

        let status = response.status();
        let payload = response.json::<Value>().await.map_err(|e| {
            AgentError::MalformedResponse(format!("invalid JSON from data gateway: {}", e))
        })?;

        if !status.is_success() {
            return Err(AgentError::ToolInvocationError(format!(
                "data gateway returned {} for {}: {}",
                status, api_name, payload
            )));
        }

        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(-1);
        if code != 0 {
            let msg = payload
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return Err(AgentError::ToolInvocationError(format!(
                "{} failed with code {}: {}",
                api_name, code, msg
            )));
        }

        let data = payload.get("data").ok_or_else(|| {
            AgentError::MalformedResponse(format!("{} reply has no data section", api_name))
        })?;

        rows_from_columnar(data)
    }
}

/// Convert the gateway's {fields, items} columnar layout into an array of
/// records, one object per row.
fn rows_from_columnar(data: &Value) -> Result<Value> {
    let fields = data
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedResponse("missing fields in data section".into()))?;
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::MalformedResponse("missing items in data section".into()))?;

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let cells = item
            .as_array()
            .ok_or_else(|| AgentError::MalformedResponse("row is not an array".into()))?;

        let mut row = Map::new();
        for (field, cell) in fields.iter().zip(cells) {
            if let Some(name) = field.as_str() {
                row.insert(name.to_string(), cell.clone());
            }
        }
        rows.push(Value::Object(row));
    }

    Ok(Value::Array(rows))
}

fn require_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::MissingArgument(format!("expected '{}' in arguments", key)))
}

//
// ================= Provider Tools =================
//

pub struct StockBasicTool {
    api: TushareClient,
}

#[async_trait::async_trait]
impl Tool for StockBasicTool {
    fn name(&self) -> &'static str {
        Operation::BasicInfo.wire_name()
    }

    fn description(&self) -> &'static str {
        Operation::BasicInfo.description()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let stock_code = require_str(arguments, "stock_code")?;
        self.api
            .call("stock_basic", json!({ "ts_code": stock_code }))
            .await
    }
}

pub struct StockPriceTool {
    api: TushareClient,
}

#[async_trait::async_trait]
impl Tool for StockPriceTool {
    fn name(&self) -> &'static str {
        Operation::HistoricalPrice.wire_name()
    }

    fn description(&self) -> &'static str {
        Operation::HistoricalPrice.description()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let stock_code = require_str(arguments, "stock_code")?;
        self.api.call("daily", json!({ "ts_code": stock_code })).await
    }
}

pub struct RealtimePriceTool {
    api: TushareClient,
}

#[async_trait::async_trait]
impl Tool for RealtimePriceTool {
    fn name(&self) -> &'static str {
        Operation::RealtimePrice.wire_name()
    }

    fn description(&self) -> &'static str {
        Operation::RealtimePrice.description()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let stock_code = require_str(arguments, "stock_code")?;
        self.api
            .call("realtime_price", json!({ "ts_code": stock_code }))
            .await
    }
}

pub struct FinancialIndicatorTool {
    api: TushareClient,
}

#[async_trait::async_trait]
impl Tool for FinancialIndicatorTool {
    fn name(&self) -> &'static str {
        Operation::FinancialIndicator.wire_name()
    }

    fn description(&self) -> &'static str {
        Operation::FinancialIndicator.description()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let stock_code = require_str(arguments, "stock_code")?;
        let period = arguments
            .get("period")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PERIOD);
        self.api
            .call(
                "financial_indicator",
                json!({ "ts_code": stock_code, "period": period }),
            )
            .await
    }
}

//
// ================= Mock Tool =================
//

/// Offline tool returning fixture payloads in the same record shape the
/// gateway produces. Keeps tests and demos working without a token; the
/// invocation counter makes zero-side-effect paths observable.
pub struct MockDataTool {
    operation: Operation,
    invocations: Arc<AtomicUsize>,
}

impl MockDataTool {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait::async_trait]
impl Tool for MockDataTool {
    fn name(&self) -> &'static str {
        self.operation.wire_name()
    }

    fn description(&self) -> &'static str {
        self.operation.description()
    }

    async fn invoke(&self, arguments: &Map<String, Value>) -> Result<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let stock_code = require_str(arguments, "stock_code")?;
        Ok(mock_payload(self.operation, stock_code))
    }
}

/// Fixture payloads for the four operations
pub fn mock_payload(operation: Operation, stock_code: &str) -> Value {
    let is_moutai = stock_code == "600519.SH";
    match operation {
        Operation::BasicInfo => json!([{
            "ts_code": stock_code,
            "name": if is_moutai { "贵州茅台" } else { "平安银行" },
            "area": if is_moutai { "贵州" } else { "广东" },
            "industry": if is_moutai { "白酒" } else { "银行" },
            "market": "主板",
            "exchange": if stock_code.ends_with(".SH") { "SSE" } else { "SZSE" },
            "list_date": "2001-08-27",
            "fullname": if is_moutai { "贵州茅台酒股份有限公司" } else { "平安银行股份有限公司" },
        }]),
        Operation::HistoricalPrice => json!([{
            "ts_code": stock_code,
            "trade_date": "2024-01-15",
            "open": 1650.0,
            "high": 1680.0,
            "low": 1645.0,
            "close": 1675.5,
            "vol": 5000000,
            "amount": 8375000000u64,
        }]),
        Operation::RealtimePrice => json!([{
            "ts_code": stock_code,
            "name": if is_moutai { "贵州茅台" } else { "平安银行" },
            "price": 1675.5,
            "change": 25.5,
            "change_percent": 1.55,
            "volume": 50000,
            "amount": 83750000,
            "time": "14:30:00",
        }]),
        Operation::FinancialIndicator => json!([{
            "ts_code": stock_code,
            "ann_date": "2023-10-28",
            "end_date": "2023-09-30",
            "eps": 15.88,
            "bps": 125.36,
            "roe": 12.67,
            "profit_margin": 52.3,
        }]),
    }
}

//
// ================= Registry Builders =================
//

/// Registry backed by the live data gateway
pub fn create_default_registry(config: &AgentConfig) -> ToolRegistry {
    let api = TushareClient::new(
        config.tushare_token.clone(),
        config.tushare_base_url.clone(),
        config.tool_timeout,
    );

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StockBasicTool { api: api.clone() }));
    registry.register(Arc::new(StockPriceTool { api: api.clone() }));
    registry.register(Arc::new(RealtimePriceTool { api: api.clone() }));
    registry.register(Arc::new(FinancialIndicatorTool { api }));
    registry
}

/// Registry backed by fixtures, for offline runs and tests
pub fn create_mock_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for op in Operation::ALL {
        registry.register(Arc::new(MockDataTool::new(op)));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_columnar() {
        let data = json!({
            "fields": ["ts_code", "name"],
            "items": [["600519.SH", "贵州茅台"], ["000001.SZ", "平安银行"]],
        });

        let rows = rows_from_columnar(&data).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "贵州茅台");
        assert_eq!(rows[1]["ts_code"], "000001.SZ");
    }

    #[test]
    fn test_rows_from_columnar_rejects_missing_fields() {
        let data = json!({ "items": [] });
        assert!(rows_from_columnar(&data).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = create_mock_registry();
        assert_eq!(registry.list().len(), 4);
        assert!(registry.get("get_stock_basic").is_some());
        assert!(registry.get("get_weather").is_none());
    }

    #[tokio::test]
    async fn test_mock_tool_counts_invocations() {
        let tool = MockDataTool::new(Operation::BasicInfo);
        let counter = tool.counter();

        let mut arguments = Map::new();
        arguments.insert("stock_code".to_string(), json!("600519.SH"));

        let payload = tool.invoke(&arguments).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(payload[0]["name"], "贵州茅台");
    }

    #[tokio::test]
    async fn test_mock_tool_requires_stock_code() {
        let tool = MockDataTool::new(Operation::RealtimePrice);
        let result = tool.invoke(&Map::new()).await;
        assert!(matches!(result, Err(AgentError::MissingArgument(_))));
    }
}
