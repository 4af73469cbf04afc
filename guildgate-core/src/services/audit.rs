//! Audit sink - every decision that changes someone's standing goes through
//! here exactly once: into the ledger, into the structured log, and out to
//! the forward hook when one is registered.

use crate::hooks::HookHub;
use crate::models::AuditEvent;
use crate::services::cache::CacheStore;

#[derive(Clone)]
pub struct AuditSink {
    cache: CacheStore,
    hooks: HookHub,
}

impl AuditSink {
    pub fn new(cache: CacheStore, hooks: HookHub) -> Self {
        Self { cache, hooks }
    }

    pub fn record(&self, event: AuditEvent) {
        tracing::info!(
            kind = event.kind.as_str(),
            player_id = ?event.player_id,
            community_id = ?event.community_id,
            actor = ?event.actor,
            message = %event.message,
            "Audit event"
        );
        self.hooks.forward_audit(&event);
        self.cache.append_event(event);
    }
}
