//! The agent orchestrator — the heart of Cairn.
//!
//! One inbound message runs one **turn**:
//!
//! 1. **Resolve** the caller from the request context
//! 2. **Load** the conversation and append the message
//! 3. **Build** the system prompt from the tools the caller may use
//! 4. **Loop**: call the model; if it asks for tools, run them through the
//!    registry and feed the results back, until it answers in text or the
//!    iteration limit is reached
//! 5. **Save** the conversation
//!
//! Everything the turn produces is streamed to the caller as
//! [`OutputUnit`]s. Dropping the stream cancels the turn.
//!
//! Seven extension lists (see [`cairn_core::extension`]) plug into the turn;
//! this crate also ships the stock implementations of each.

pub mod agent;
pub mod enhancer;
pub mod enrichers;
pub mod filters;
pub mod hooks;
pub mod middleware;
pub mod output;
pub mod prompt;
pub mod recovery;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod turn;

mod emitter;

pub use agent::{Agent, AgentBuilder, TurnStream};
pub use enhancer::{AdaptiveMemoryEnhancer, MemoryBasedEnhancer};
pub use enrichers::{QuestionEnricher, UserContextEnricher};
pub use filters::MaxMessagesFilter;
pub use hooks::{
    analyze_query_log, export_successful_queries, MessageLengthHook, QueryLogStats, QueryLoggingHook,
    ReadOnlySqlHook, TrainingPair, QUESTION_KEY,
};
pub use middleware::{MaxTokensCapMiddleware, RequestLoggingMiddleware};
pub use output::{OutputUnit, StatusLevel, TaskState, UnitBody};
pub use prompt::{memory_workflow_instructions, DefaultSystemPromptBuilder, DomainPromptBuilder};
pub use recovery::{FailFast, OnExhausted, RetryStrategy};
pub use turn::USER_MESSAGE_KEY;
