pub mod chat;

pub use chat::{ChatMessage, ChatRequest, SessionId, SourceInfo, TurnMetadata};
