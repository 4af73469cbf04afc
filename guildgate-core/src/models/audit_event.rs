//! Audit event model - the append-only ledger of authorization decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event kinds. The set is closed; frontends render by matching on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    NameChanged,
    FirstAllow,
    LegacyKick,
    AccessRevoked,
    LeftCommunity,
    Banned,
    Unbanned,
    Warned,
    Comment,
    WhitelistAdded,
    WhitelistRemoved,
    Linked,
    Unlinked,
    TokenIssued,
    ApplicationSubmitted,
    ApplicationApproved,
    ApplicationDenied,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::NameChanged => "name_changed",
            AuditKind::FirstAllow => "first_allow",
            AuditKind::LegacyKick => "legacy_kick",
            AuditKind::AccessRevoked => "access_revoked",
            AuditKind::LeftCommunity => "left_community",
            AuditKind::Banned => "banned",
            AuditKind::Unbanned => "unbanned",
            AuditKind::Warned => "warned",
            AuditKind::Comment => "comment",
            AuditKind::WhitelistAdded => "whitelist_added",
            AuditKind::WhitelistRemoved => "whitelist_removed",
            AuditKind::Linked => "linked",
            AuditKind::Unlinked => "unlinked",
            AuditKind::TokenIssued => "token_issued",
            AuditKind::ApplicationSubmitted => "application_submitted",
            AuditKind::ApplicationApproved => "application_approved",
            AuditKind::ApplicationDenied => "application_denied",
        }
    }
}

/// One ledger entry. Events live in the cache file alongside the records
/// they describe and are kept in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    #[serde(default)]
    pub player_id: Option<Uuid>,
    #[serde(default)]
    pub community_id: Option<u64>,
    /// Admin or bot that triggered the event; `None` for engine decisions.
    #[serde(default)]
    pub actor: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event produced by the engine itself (no human actor).
    pub fn system(kind: AuditKind, player_id: Option<Uuid>, message: String) -> Self {
        Self {
            kind,
            player_id,
            community_id: None,
            actor: None,
            message,
            at: Utc::now(),
        }
    }

    /// Event produced by an administrative command.
    pub fn admin(kind: AuditKind, actor: &str, player_id: Option<Uuid>, message: String) -> Self {
        Self {
            kind,
            player_id,
            community_id: None,
            actor: Some(actor.to_string()),
            message,
            at: Utc::now(),
        }
    }

    /// Event originating on the community side, keyed by remote account.
    pub fn community(kind: AuditKind, community_id: u64, message: String) -> Self {
        Self {
            kind,
            player_id: None,
            community_id: Some(community_id),
            actor: None,
            message,
            at: Utc::now(),
        }
    }

    pub fn for_community(mut self, community_id: u64) -> Self {
        self.community_id = Some(community_id);
        self
    }
}
