//! Runtime configuration for the authorization engine.
//!
//! The host owns durable storage of these values; the engine exposes a typed
//! handle plus a by-name get/set surface so command frontends can read and
//! update fields while the engine is running. Every field change takes effect
//! on the next decision without a restart, except the bridge credentials
//! which apply on the next bridge start or reload.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::models::DEFAULT_TOKEN_TTL_MINUTES;

/// How strictly decisions are applied.
///
/// `DryRun` evaluates everything and writes every audit event and cache
/// mutation, but suppresses disconnections and login denials that would
/// revoke a previously working grant. Declining to grant a stranger is not
/// a revocation and still applies in dry-run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enforcement {
    Off,
    DryRun,
    Active,
}

impl Enforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Enforcement::Off => "off",
            Enforcement::DryRun => "dry_run",
            Enforcement::Active => "active",
        }
    }
}

impl Default for Enforcement {
    // New installs observe before they kick.
    fn default() -> Self {
        Enforcement::DryRun
    }
}

impl FromStr for Enforcement {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "disabled" => Ok(Enforcement::Off),
            "dry_run" | "dryrun" | "dry-run" => Ok(Enforcement::DryRun),
            "active" | "on" | "enforce" => Ok(Enforcement::Active),
            other => Err(GateError::ConfigInvalid(format!(
                "enforcement must be one of off, dry_run, active (got '{}')",
                other
            ))),
        }
    }
}

/// Credentials and targets the role bridge needs to open a connection.
/// `None` from [`Settings::bridge`] means the bridge is unconfigured and
/// must stay disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub auth_token: String,
    pub group_id: u64,
    /// Specific role gating access. Absent means any group member qualifies.
    pub role_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsData {
    pub community_token: String,
    pub community_group_id: Option<u64>,
    pub community_role_id: Option<u64>,
    pub application_message: String,
    pub invite_hint: Option<String>,
    pub enforcement: Enforcement,
    pub cache_path: PathBuf,
    pub link_token_ttl_minutes: u64,
    pub role_check_timeout_secs: u64,
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            community_token: String::new(),
            community_group_id: None,
            community_role_id: None,
            application_message:
                "Access to this server is managed through our community. Please apply there."
                    .to_string(),
            invite_hint: None,
            enforcement: Enforcement::default(),
            cache_path: PathBuf::from("guildgate-cache.json"),
            link_token_ttl_minutes: DEFAULT_TOKEN_TTL_MINUTES as u64,
            role_check_timeout_secs: 5,
        }
    }
}

/// One entry of the by-name field registry.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Example value shown when prompting an operator for input.
    pub sample: &'static str,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "community_token",
        sample: "your-bot-token",
    },
    FieldSpec {
        name: "community_group_id",
        sample: "123456789012345678",
    },
    FieldSpec {
        name: "community_role_id",
        sample: "987654321098765432",
    },
    FieldSpec {
        name: "application_message",
        sample: "Access is managed through our community. Apply in #applications.",
    },
    FieldSpec {
        name: "invite_hint",
        sample: "https://example.com/invite",
    },
    FieldSpec {
        name: "enforcement",
        sample: "active",
    },
    FieldSpec {
        name: "cache_path",
        sample: "data/guildgate-cache.json",
    },
    FieldSpec {
        name: "link_token_ttl_minutes",
        sample: "30",
    },
    FieldSpec {
        name: "role_check_timeout_secs",
        sample: "5",
    },
];

/// Shared, mutable view of the engine configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    inner: Arc<RwLock<SettingsData>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(SettingsData::default())
    }
}

impl Settings {
    pub fn new(data: SettingsData) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SettingsData> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SettingsData> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// All known field names, in registry order.
    pub fn fields() -> &'static [FieldSpec] {
        FIELDS
    }

    /// Example value for a field, for prompting. `None` for unknown fields.
    pub fn sample(field: &str) -> Option<&'static str> {
        FIELDS.iter().find(|f| f.name == field).map(|f| f.sample)
    }

    /// Current value rendered as a string. Unset optional fields render
    /// empty; `None` means the field name is unknown.
    pub fn get(&self, field: &str) -> Option<String> {
        let data = self.read();
        let value = match field {
            "community_token" => data.community_token.clone(),
            "community_group_id" => render_opt_u64(data.community_group_id),
            "community_role_id" => render_opt_u64(data.community_role_id),
            "application_message" => data.application_message.clone(),
            "invite_hint" => data.invite_hint.clone().unwrap_or_default(),
            "enforcement" => data.enforcement.as_str().to_string(),
            "cache_path" => data.cache_path.display().to_string(),
            "link_token_ttl_minutes" => data.link_token_ttl_minutes.to_string(),
            "role_check_timeout_secs" => data.role_check_timeout_secs.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Parse and store a field by name. An empty value clears optional
    /// fields and is rejected for required ones.
    pub fn set(&self, field: &str, value: &str) -> Result<(), GateError> {
        let value = value.trim();
        let mut data = self.write();
        match field {
            "community_token" => data.community_token = value.to_string(),
            "community_group_id" => data.community_group_id = parse_opt_u64(field, value)?,
            "community_role_id" => data.community_role_id = parse_opt_u64(field, value)?,
            "application_message" => {
                if value.is_empty() {
                    return Err(GateError::ConfigInvalid(
                        "application_message must not be empty".to_string(),
                    ));
                }
                data.application_message = value.to_string();
            }
            "invite_hint" => {
                data.invite_hint = (!value.is_empty()).then(|| value.to_string());
            }
            "enforcement" => data.enforcement = value.parse()?,
            "cache_path" => {
                if value.is_empty() {
                    return Err(GateError::ConfigInvalid(
                        "cache_path must not be empty".to_string(),
                    ));
                }
                data.cache_path = PathBuf::from(value);
            }
            "link_token_ttl_minutes" => {
                data.link_token_ttl_minutes = parse_positive_u64(field, value)?;
            }
            "role_check_timeout_secs" => {
                data.role_check_timeout_secs = parse_positive_u64(field, value)?;
            }
            other => {
                return Err(GateError::ConfigInvalid(format!(
                    "unknown configuration field '{}'",
                    other
                )));
            }
        }
        tracing::info!(field, "Configuration field updated");
        Ok(())
    }

    pub fn enforcement(&self) -> Enforcement {
        self.read().enforcement
    }

    pub fn application_message(&self) -> String {
        self.read().application_message.clone()
    }

    pub fn invite_hint(&self) -> Option<String> {
        self.read().invite_hint.clone()
    }

    pub fn cache_path(&self) -> PathBuf {
        self.read().cache_path.clone()
    }

    pub fn link_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.read().link_token_ttl_minutes as i64)
    }

    pub fn role_check_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.read().role_check_timeout_secs)
    }

    /// Bridge credentials, or `None` while token or group id are missing.
    pub fn bridge(&self) -> Option<BridgeSettings> {
        let data = self.read();
        if data.community_token.is_empty() {
            return None;
        }
        Some(BridgeSettings {
            auth_token: data.community_token.clone(),
            group_id: data.community_group_id?,
            role_id: data.community_role_id,
        })
    }

    /// Point-in-time copy, for snapshotting into logs or status output.
    pub fn snapshot(&self) -> SettingsData {
        self.read().clone()
    }
}

fn render_opt_u64(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_opt_u64(field: &str, value: &str) -> Result<Option<u64>, GateError> {
    if value.is_empty() {
        return Ok(None);
    }
    value.parse::<u64>().map(Some).map_err(|_| {
        GateError::ConfigInvalid(format!("{} must be a numeric id (got '{}')", field, value))
    })
}

fn parse_positive_u64(field: &str, value: &str) -> Result<u64, GateError> {
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(GateError::ConfigInvalid(format!(
            "{} must be a positive integer (got '{}')",
            field, value
        ))),
    }
}
