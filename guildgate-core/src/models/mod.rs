//! Data model for the authorization engine.
//!
//! Everything here serializes with serde because the cache file is the only
//! durable store; there is no database behind the engine.

pub mod application;
pub mod audit_event;
pub mod identity;
pub mod link_token;

pub use application::{ApplicationStatus, WhitelistApplication};
pub use audit_event::{AuditEvent, AuditKind};
pub use identity::{IdentityRecord, PERMANENT_BAN_YEAR};
pub use link_token::{LinkToken, DEFAULT_TOKEN_TTL_MINUTES};
