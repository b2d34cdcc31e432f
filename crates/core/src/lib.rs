//! # Cairn Core
//!
//! Domain types, traits, and error definitions for the Cairn agent
//! orchestrator. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the orchestrator is defined as a trait here:
//! the model gateway, tools, the user resolver, the conversation store,
//! long-term agent memory, the observability sink, and the seven extension
//! contracts. Implementations live in their respective crates, which keeps
//! the dependency graph pointing inward and makes every collaborator
//! replaceable by a test double.

pub mod error;
pub mod message;
pub mod model;
pub mod tool;
pub mod user;
pub mod memory;
pub mod store;
pub mod context;
pub mod observability;
pub mod extension;
pub mod agent;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Message, Role, Conversation, ConversationId, MessageToolCall};
pub use model::{ModelGateway, ModelRequest, ModelResponse, StreamChunk, Usage};
pub use tool::{Tool, ToolCall, ToolResult, ToolSchema, ToolErrorKind, ToolFailure};
pub use user::{User, RequestContext, UserResolver, StaticUserResolver};
pub use memory::{AgentMemory, ToolMemory, TextMemory, ToolMemorySearchResult, TextMemorySearchResult};
pub use store::ConversationStore;
pub use context::{RequestEnvelope, Metadata};
pub use observability::{ObservabilitySink, Span, Metric, NoopSink};
pub use extension::{
    LifecycleHook, LlmMiddleware, ContextEnricher, LlmContextEnhancer,
    ConversationFilter, ErrorRecoveryStrategy, SystemPromptBuilder, RecoveryAction,
};
pub use agent::AgentConfig;
