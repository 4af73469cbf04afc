//! Error types for the authorization engine.
//!
//! Decision paths (`decide_login`, `decide_join`) never surface errors to the
//! caller; remote and storage failures degrade into cached or conservative
//! outcomes instead. `GateError` covers the operations where a caller can act
//! on the failure: explicit saves, link completion, admin mutations and
//! bridge lifecycle transitions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Cache file is corrupt: {0}")]
    CacheCorrupt(#[from] serde_json::Error),

    #[error("Cache persistence failed: {0}")]
    CachePersist(#[from] std::io::Error),

    #[error("Link token not found or expired")]
    TokenNotFound,

    #[error("Community account {0} is already linked to another player")]
    AlreadyLinked(u64),

    #[error("Player not found")]
    PlayerNotFound,

    #[error("Application not found")]
    ApplicationNotFound,

    #[error("Application has already been resolved")]
    ApplicationAlreadyResolved,

    #[error("Role bridge stopped before the operation completed")]
    BridgeStopped,

    #[error("Role bridge failed to start: {0}")]
    BridgeStartFailed(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
