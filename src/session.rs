//! Session store
//!
//! Keeps per-session conversation state across turns. State is created
//! lazily on first reference, grows append-only, and is never evicted
//! (unbounded growth is a known resource concern). Writes are serialized
//! per session id; distinct sessions proceed fully concurrently.
//!
//! In-memory by default; a Postgres backend is selected from the
//! environment, with lazy schema creation and in-memory fallback.

use crate::error::AgentError;
use crate::models::{ConversationState, Operation, ToolResult, TurnRecord};
use crate::Result;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Session id used when the surface does not address sessions explicitly
pub const DEFAULT_SESSION_ID: &str = "default";

enum SessionBackend {
    InMemory {
        // One mutex per session id: appends within a session serialize,
        // different sessions never contend.
        sessions: RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: OnceCell<()>,
    },
}

pub struct SessionStore {
    backend: SessionBackend,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            backend: SessionBackend::InMemory {
                sessions: RwLock::new(HashMap::new()),
            },
        }
    }

    /// Pick the backend from the environment: POSTGRES_URL/DATABASE_URL
    /// selects Postgres, anything else (or a connect failure) falls back
    /// to in-memory.
    pub fn from_env() -> Self {
        let database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Some(url) = database_url {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(&url)
            {
                Ok(pool) => {
                    info!("Session store backend: postgres");
                    return Self {
                        backend: SessionBackend::Postgres {
                            pool,
                            schema_ready: OnceCell::new(),
                        },
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres session store, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session store backend: in-memory");
        Self::new()
    }

    /// Snapshot of a session's state, creating it lazily on first use
    pub async fn get_or_create(&self, session_id: &str) -> Result<ConversationState> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let entry = Self::entry(sessions, session_id).await;
                let state = entry.lock().await;
                Ok(state.clone())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let rows = sqlx::query(
                    r#"
                    SELECT turn_id, query, operation, result, answer, created_at
                    FROM turn_records
                    WHERE session_id = $1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(session_id)
                .fetch_all(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to load session state: {}", e))
                })?;

                let mut state = ConversationState::new(session_id);
                for row in rows {
                    let operation: Option<String> = row.try_get("operation").unwrap_or(None);
                    let result: Option<String> = row.try_get("result").unwrap_or(None);

                    state.append_existing(TurnRecord {
                        turn_id: row.try_get("turn_id").unwrap_or_else(|_| Uuid::new_v4()),
                        query: row.try_get("query").unwrap_or_default(),
                        operation: operation
                            .as_deref()
                            .and_then(Operation::from_wire_name),
                        result: result
                            .as_deref()
                            .and_then(|s| serde_json::from_str::<ToolResult>(s).ok()),
                        answer: row.try_get("answer").unwrap_or_default(),
                        created_at: row
                            .try_get("created_at")
                            .unwrap_or_else(|_| chrono::Utc::now()),
                    });
                }

                Ok(state)
            }
        }
    }

    /// Append one turn record; monotonic, nothing is ever removed
    pub async fn append(&self, session_id: &str, record: TurnRecord) -> Result<()> {
        match &self.backend {
            SessionBackend::InMemory { sessions } => {
                let entry = Self::entry(sessions, session_id).await;
                let mut state = entry.lock().await;
                state.append(record);
                Ok(())
            }
            SessionBackend::Postgres { pool, .. } => {
                self.ensure_schema_if_needed().await?;

                let result = record
                    .result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;

                sqlx::query(
                    r#"
                    INSERT INTO turn_records
                      (turn_id, session_id, query, operation, result, answer, created_at)
                    VALUES
                      ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(record.turn_id)
                .bind(session_id)
                .bind(&record.query)
                .bind(record.operation.map(|op| op.wire_name()))
                .bind(result)
                .bind(&record.answer)
                .bind(record.created_at)
                .execute(pool)
                .await
                .map_err(|e| {
                    AgentError::DatabaseError(format!("Failed to insert turn record: {}", e))
                })?;

                Ok(())
            }
        }
    }

    pub async fn turn_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.get_or_create(session_id).await?.len())
    }

    async fn entry(
        sessions: &RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
        session_id: &str,
    ) -> Arc<Mutex<ConversationState>> {
        {
            let locked = sessions.read().await;
            if let Some(state) = locked.get(session_id) {
                return state.clone();
            }
        }

        let mut locked = sessions.write().await;
        locked
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(session_id))))
            .clone()
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        let SessionBackend::Postgres { pool, schema_ready } = &self.backend else {
            return Ok(());
        };

        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS turn_records (
                      turn_id UUID PRIMARY KEY,
                      session_id TEXT NOT NULL,
                      query TEXT NOT NULL,
                      operation TEXT,
                      result TEXT,
                      answer TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_turn_records_session_time
                    ON turn_records (session_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!("Failed to initialize session schema: {}", e))
            })?;

        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;

    fn record(query: &str) -> TurnRecord {
        TurnRecord::new(
            query.to_string(),
            Some(Operation::BasicInfo),
            None,
            "ok".to_string(),
        )
    }

    #[tokio::test]
    async fn test_lazy_creation() {
        let store = SessionStore::new();
        let state = store.get_or_create("fresh").await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_appends_accumulate_per_session() {
        let store = SessionStore::new();

        store.append("a", record("第一问")).await.unwrap();
        store.append("a", record("第二问")).await.unwrap();
        store.append("b", record("别的会话")).await.unwrap();

        assert_eq!(store.turn_count("a").await.unwrap(), 2);
        assert_eq!(store.turn_count("b").await.unwrap(), 1);

        let state = store.get_or_create("a").await.unwrap();
        let queries: Vec<_> = state.turns().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["第一问", "第二问"]);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        store.append("a", record("第一问")).await.unwrap();

        let other = store.get_or_create("c").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_distinct_sessions() {
        let store = Arc::new(SessionStore::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("session-{}", i % 2);
                store.append(&id, record("并发")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.turn_count("session-0").await.unwrap(), 4);
        assert_eq!(store.turn_count("session-1").await.unwrap(), 4);
    }
}
