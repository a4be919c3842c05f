//! REST API server
//!
//! Exposes the agent over HTTP for frontend integration. The chat
//! endpoint drives the cyclic topology so multi-step turns stay
//! available to clients; session addressing is optional and arbitrary
//! client-supplied ids are mapped to stable uuids.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::controller::LoopController;
use crate::session::DEFAULT_SESSION_ID;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub session_id: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<LoopController>,
}

/// =============================
/// Helpers — Session Identity
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn resolve_session_id(raw: Option<&str>) -> String {
    match raw {
        Some(value) if !value.trim().is_empty() => {
            let value = value.trim();
            match uuid::Uuid::parse_str(value) {
                Ok(id) => id.to_string(),
                Err(_) => stable_uuid_from_string(value).to_string(),
            }
        }
        _ => DEFAULT_SESSION_ID.to_string(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let question = req.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("question must not be empty".into())),
        );
    }

    let session_id = resolve_session_id(req.session_id.as_deref());
    info!(session_id = %session_id, question, "Received chat request");

    let answer = state.controller.handle_cyclic_turn(&session_id, question).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "answer": answer,
            "session_id": session_id,
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(controller: Arc<LoopController>) -> Router {
    let state = ApiState { controller };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/chat", post(chat_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    controller: Arc<LoopController>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(controller);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_session_id_is_deterministic() {
        let a = resolve_session_id(Some("alice"));
        let b = resolve_session_id(Some("alice"));
        let c = resolve_session_id(Some("bob"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_missing_session_id_uses_default() {
        assert_eq!(resolve_session_id(None), DEFAULT_SESSION_ID);
        assert_eq!(resolve_session_id(Some("  ")), DEFAULT_SESSION_ID);
    }

    #[test]
    fn test_valid_uuid_passes_through() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(resolve_session_id(Some(&id.to_string())), id.to_string());
    }

    #[test]
    fn test_api_response_envelope() {
        let ok = ApiResponse::success(serde_json::json!({"answer": "好"}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = ApiResponse::error("boom".into());
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
