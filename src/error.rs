//! Error taxonomy for the sync core.

use thiserror::Error;

/// Everything that can go wrong while reconciling or submitting intents.
///
/// Lookup misses (`NotFound`, `ItemNotFound`) are recoverable and the caller
/// picks a fallback. Local invariant violations (`CyclicParent`,
/// `NameCollision`, `DuplicateId`) leave the store untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{kind} with id {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("setting parent of {child} to {parent} would create a cycle")]
    CyclicParent { child: String, parent: String },

    #[error("name {name} already used on action point {action_point_id}")]
    NameCollision {
        action_point_id: String,
        name: String,
    },

    #[error("id {0} is already used by another entity")]
    DuplicateId(String),

    #[error("{operation} failed: {}", messages.join("; "))]
    RequestFailed {
        operation: String,
        messages: Vec<String>,
    },

    #[error("{id} is locked by {owner}")]
    Locked { id: String, owner: String },

    #[error("not connected to the server")]
    Disconnected,

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("flag storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl SyncError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn request_failed(operation: impl Into<String>, messages: Vec<String>) -> Self {
        Self::RequestFailed {
            operation: operation.into(),
            messages,
        }
    }

    /// True for lookup misses a caller is expected to recover from.
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::ItemNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
