//! Stock Query Agent
//!
//! A natural-language stock query agent that:
//! - Routes free-text questions to a closed set of data lookups
//! - Drives a bounded decide → act loop across turns
//! - Carries per-session conversation state
//! - Converts heterogeneous results and failures into one deterministic answer
//!
//! TURN PIPELINE:
//! QUERY → ANALYZE → EXECUTE → SYNTHESIZE → DONE

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod llm;
pub mod models;
pub mod router;
pub mod session;
pub mod synthesizer;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use router::IntentRouter;
