//! Agent memory and conversation store implementations for Cairn.

pub mod noop;
pub mod in_memory;
pub mod file_backend;
pub mod similarity;
pub mod conversation_store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use noop::NoopAgentMemory;
pub use in_memory::InMemoryAgentMemory;
pub use file_backend::FileAgentMemory;
pub use similarity::{cosine_similarity, text_similarity};
pub use conversation_store::{FileConversationStore, InMemoryConversationStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConversationStore;
