//! Conversation state and upstream orchestration for a per-user LLM chat relay.
//!
//! # Overview
//! A caller sends a prompt together with an identity token. The relay resolves
//! the token to a user id, forwards the prompt to an OpenAI Responses endpoint
//! (resuming the user's conversation through a continuation token), and hands
//! the reply back either as one JSON document or as a stream of text fragments.
//!
//! # Architecture
//! - [`store`] keeps each user's transcript and continuation token
//! - [`payload`] composes the exact upstream request body
//! - [`gateway`] runs a turn, recovers stuck conversations and commits results
//! - [`orchestrator`] is the per-request control flow used by the HTTP layer

/// Message and wire types
pub mod chat;

/// Process-wide model settings
pub mod config;

/// Error types and handling
pub mod error;

/// Recoverable upstream fault detection
pub mod fault;

pub mod gateway;

/// Identity oracle and user id resolution
pub mod identity;

pub mod orchestrator;

pub mod outbound;

pub mod payload;

pub mod store;

/// Model API contract and the OpenAI Responses client
pub mod upstream;

#[cfg(test)]
pub mod test_utils;

pub use chat::{ChatReply, ChatRequest, Message, Role, TranscriptEntry};
pub use config::ChatConfig;
pub use error::{RelayError, RelayResult};
pub use gateway::ModelGateway;
pub use identity::{IdentityOracle, SupabaseIdentity};
pub use orchestrator::{ChatOutcome, RequestOrchestrator};
pub use store::{ConversationStore, InMemoryConversationStore};
pub use upstream::{ModelApi, OpenAiResponses};
