//! Construction Finance Assistant
//!
//! A chat backend that lets construction project managers ask budget
//! questions in plain language:
//! - Streams answers from a hosted LLM reached through OpenRouter
//! - Lets the model call five read-only finance tools
//! - Relays pre-aggregated rows from the data service, formatted for display
//! - Caps every conversation turn at a fixed number of model round trips
//! - Logs each completed conversation without delaying the response
//!
//! LOOP:
//! MESSAGES → MODEL → TOOL CALLS → TOOL RESULTS → MODEL → ... → FINISH → LOG

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod format;
pub mod gateway;
pub mod llm;
pub mod models;
pub mod stream;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{ChatStream, ChatTranscript, Orchestrator, OrchestratorSettings};
