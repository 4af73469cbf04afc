//! Identity record model - the per-player row of the durable cache.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ban expiries in or beyond this year are treated as permanent when the
/// record came from an import that used a far-future sentinel instead of
/// omitting the expiry.
pub const PERMANENT_BAN_YEAR: i32 = 9999;

/// Everything the engine knows about one local player.
///
/// A record is created the first time the engine observes a player through a
/// login attempt, a link completion or an admin action. `has_access` is the
/// cached authorization verdict; it is only re-derived from the remote role
/// authority when the bridge is up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub player_id: Uuid,
    #[serde(default)]
    pub community_id: Option<u64>,
    #[serde(default)]
    pub has_access: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub community_username: Option<String>,
    #[serde(default)]
    pub community_nickname: Option<String>,
    #[serde(default)]
    pub ban_reason: Option<String>,
    #[serde(default)]
    pub ban_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub warn_count: u32,
}

impl IdentityRecord {
    pub fn new(player_id: Uuid) -> Self {
        Self {
            player_id,
            community_id: None,
            has_access: false,
            is_admin: false,
            player_name: None,
            community_username: None,
            community_nickname: None,
            ban_reason: None,
            ban_until: None,
            warn_count: 0,
        }
    }

    pub fn with_name(player_id: Uuid, player_name: &str) -> Self {
        Self {
            player_name: Some(player_name.to_string()),
            ..Self::new(player_id)
        }
    }

    pub fn is_linked(&self) -> bool {
        self.community_id.is_some()
    }

    /// A ban is active while a reason is set and the expiry, if any, lies in
    /// the future. No expiry means permanent.
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.ban_reason.is_some() && self.ban_until.map_or(true, |until| until > now)
    }

    pub fn is_permanently_banned(&self) -> bool {
        self.ban_reason.is_some()
            && match self.ban_until {
                None => true,
                Some(until) => until.year() >= PERMANENT_BAN_YEAR,
            }
    }

    /// Denial text shown to a banned player at login.
    pub fn ban_message(&self) -> String {
        let reason = self.ban_reason.as_deref().unwrap_or("no reason given");
        match self.ban_until {
            Some(until) if !self.is_permanently_banned() => format!(
                "Banned until {}: {}",
                until.format("%Y-%m-%d %H:%M UTC"),
                reason
            ),
            _ => format!("Banned: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_ban_without_expiry_is_permanent() {
        let mut record = IdentityRecord::new(Uuid::new_v4());
        record.ban_reason = Some("griefing".to_string());

        let now = Utc::now();
        assert!(record.is_banned(now));
        assert!(record.is_permanently_banned());
        assert!(record.is_banned(now + Duration::days(365 * 100)));
        assert_eq!(record.ban_message(), "Banned: griefing");
    }

    #[test]
    fn test_expired_ban_no_longer_denies() {
        let now = Utc::now();
        let mut record = IdentityRecord::new(Uuid::new_v4());
        record.ban_reason = Some("spam".to_string());
        record.ban_until = Some(now - Duration::minutes(1));

        assert!(!record.is_banned(now));
    }

    #[test]
    fn test_future_expiry_denies_until_it_passes() {
        let now = Utc::now();
        let mut record = IdentityRecord::new(Uuid::new_v4());
        record.ban_reason = Some("toxicity".to_string());
        record.ban_until = Some(now + Duration::hours(2));

        assert!(record.is_banned(now));
        assert!(!record.is_permanently_banned());
        assert!(record.ban_message().starts_with("Banned until "));
        assert!(!record.is_banned(now + Duration::hours(3)));
    }

    #[test]
    fn test_far_future_sentinel_renders_as_permanent() {
        let mut record = IdentityRecord::new(Uuid::new_v4());
        record.ban_reason = Some("imported ban".to_string());
        record.ban_until = Some(Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap());

        assert!(record.is_permanently_banned());
        assert_eq!(record.ban_message(), "Banned: imported ban");
    }

    #[test]
    fn test_unbanned_record_is_clear() {
        let record = IdentityRecord::with_name(Uuid::new_v4(), "Steve");
        assert!(!record.is_banned(Utc::now()));
        assert!(!record.is_linked());
        assert_eq!(record.player_name.as_deref(), Some("Steve"));
    }
}
