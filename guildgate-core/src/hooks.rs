//! Host integration hooks.
//!
//! The engine is embedded inside a game server and a community bot; both
//! register callbacks here instead of the engine linking against either.
//! Absent hooks degrade to no-ops so the engine runs headless in tests.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::AuditEvent;

/// Mirrors ban state into the host's native ban list, so players banned
/// through the engine stay banned even if the engine is later removed.
pub trait BanSync: Send + Sync {
    fn on_ban(&self, player_id: Uuid, reason: &str, until: Option<DateTime<Utc>>);
    fn on_unban(&self, player_id: Uuid);
}

type Messenger = dyn Fn(Uuid, &str) + Send + Sync;
type AuditForward = dyn Fn(&AuditEvent) + Send + Sync;

#[derive(Default)]
struct Registered {
    messenger: Option<Box<Messenger>>,
    ban_sync: Option<Box<dyn BanSync>>,
    audit_forward: Option<Box<AuditForward>>,
}

/// Registration point for host callbacks. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct HookHub {
    inner: Arc<RwLock<Registered>>,
}

impl HookHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registered> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registered> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the callback that delivers a chat notice to a connected
    /// player. Replaces any previous registration.
    pub fn register_messenger(&self, messenger: impl Fn(Uuid, &str) + Send + Sync + 'static) {
        self.write().messenger = Some(Box::new(messenger));
    }

    pub fn register_ban_sync(&self, sync: impl BanSync + 'static) {
        self.write().ban_sync = Some(Box::new(sync));
    }

    /// Register a forwarder that relays audit events to a remote channel.
    pub fn register_audit_forward(&self, forward: impl Fn(&AuditEvent) + Send + Sync + 'static) {
        self.write().audit_forward = Some(Box::new(forward));
    }

    /// Deliver a notice if a messenger is registered. Returns whether one was.
    pub fn message(&self, player_id: Uuid, text: &str) -> bool {
        let registered = self.read();
        match &registered.messenger {
            Some(messenger) => {
                messenger(player_id, text);
                true
            }
            None => {
                tracing::debug!(player_id = %player_id, "No messenger registered; notice dropped");
                false
            }
        }
    }

    pub fn ban_applied(&self, player_id: Uuid, reason: &str, until: Option<DateTime<Utc>>) {
        if let Some(sync) = &self.read().ban_sync {
            sync.on_ban(player_id, reason, until);
        }
    }

    pub fn ban_lifted(&self, player_id: Uuid) {
        if let Some(sync) = &self.read().ban_sync {
            sync.on_unban(player_id);
        }
    }

    pub fn forward_audit(&self, event: &AuditEvent) {
        if let Some(forward) = &self.read().audit_forward {
            forward(event);
        }
    }
}
