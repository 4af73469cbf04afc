//! Link token model - short-lived codes binding a player to a community account.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long an issued token stays redeemable unless configured otherwise.
pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

/// A single-use linking code. The player receives the code in-game and
/// submits it to the community bot, which calls back into the engine to
/// complete the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkToken {
    pub code: String,
    pub player_id: Uuid,
    pub player_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LinkToken {
    pub fn new(code: String, player_id: Uuid, player_name: &str, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            code,
            player_id,
            player_name: player_name.to_string(),
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, floored at zero for display.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}
