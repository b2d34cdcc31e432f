//! Error types for the Cairn domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Cairn operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model gateway errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Agent memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Extension errors ---
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// A model call failed and the recovery strategy gave up on it.
    #[error("Model call failed: {0}")]
    ModelCall(String),

    // --- Identity ---
    #[error("User resolution failed: {0}")]
    UserResolution(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Cancellation ---
    #[error("Turn cancelled by consumer")]
    Cancelled,

    /// An extension, tool or model gateway panicked mid-turn.
    #[error("Internal failure: {0}")]
    Panicked(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Errors raised by a tool body.
///
/// The registry converts these into structured [`crate::tool::ToolFailure`]
/// results; they never cross the registry boundary as `Err`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation {conversation_id} belongs to another user")]
    OwnerMismatch { conversation_id: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt conversation record {conversation_id}: {reason}")]
    Corrupt { conversation_id: String, reason: String },
}

/// Errors raised by extension points.
#[derive(Debug, Error)]
pub enum HookError {
    /// A vetoing hook refused the step. The reason is shown to the user.
    #[error("{reason}")]
    Rejected { reason: String },

    /// The extension itself broke.
    #[error("{extension} failed: {reason}")]
    Failed { extension: String, reason: String },
}

impl HookError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into() }
    }

    pub fn failed(extension: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            extension: extension.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn store_owner_mismatch_names_conversation() {
        let err = Error::Store(StoreError::OwnerMismatch {
            conversation_id: "conv-9".into(),
        });
        assert!(err.to_string().contains("conv-9"));
    }

    #[test]
    fn rejected_hook_error_is_just_the_reason() {
        let err = HookError::rejected("only read-only queries are allowed");
        assert_eq!(err.to_string(), "only read-only queries are allowed");
    }
}
