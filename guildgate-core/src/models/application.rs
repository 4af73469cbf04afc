//! Whitelist application model - access requests submitted from the community side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Denied,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Denied => "denied",
        }
    }
}

/// An access request filed by a community member who wants onto the server.
///
/// `player_id` is filled in when the submitted player name matched a known
/// record at submission time; otherwise the approval only takes effect once
/// an operator whitelists the player by hand or the player links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistApplication {
    pub id: Uuid,
    pub community_id: u64,
    pub player_name: String,
    #[serde(default)]
    pub player_id: Option<Uuid>,
    pub status: ApplicationStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub resolution_reason: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl WhitelistApplication {
    pub fn new(community_id: u64, player_name: &str, player_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            community_id,
            player_name: player_name.to_string(),
            player_id,
            status: ApplicationStatus::Pending,
            submitted_at: Utc::now(),
            resolution_reason: None,
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApplicationStatus::Pending
    }
}
