//! Chatbot module - decides which messages reach the completion backend
//! and composes the conversation for the ones that do.

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod limiter;
pub mod message;
pub mod openai;
pub mod quota;
pub mod tools;

#[cfg(test)]
mod tests;

pub use context::{HistoryEntry, HistoryProvider};
pub use engine::{ChatEngine, EngineConfig, Reply, COOLDOWN_REPLY, QUOTA_REPLY};
pub use message::IncomingMessage;
pub use openai::{OpenAiClient, SamplingOptions};
