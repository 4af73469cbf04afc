//! Composition point. The embedding host builds one [`GateEngine`] at
//! startup, keeps it for the process lifetime, and tears it down on exit.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::hooks::HookHub;
use crate::services::admin::AdminService;
use crate::services::audit::AuditSink;
use crate::services::bridge::{RoleBridge, RoleConnector};
use crate::services::cache::CacheStore;
use crate::services::gate::PermissionGate;
use crate::services::tokens::LinkTokenService;

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// All engine components, wired and running. Fields are public so the host
/// can reach whichever surface it needs: `gate` from connection handlers,
/// `admin` from command handlers, `bridge` and `settings` from lifecycle
/// and configuration plumbing.
pub struct GateEngine {
    pub settings: Settings,
    pub cache: CacheStore,
    pub tokens: LinkTokenService,
    pub bridge: RoleBridge,
    pub gate: PermissionGate,
    pub admin: AdminService,
    pub audit: AuditSink,
    pub hooks: HookHub,
    sweeper: CancellationToken,
}

impl GateEngine {
    /// Load the cache and construct every component. The bridge comes up
    /// stopped; the host calls [`RoleBridge::start`] once it wants to go
    /// online. Construction itself cannot fail: a missing or corrupt cache
    /// file degrades to an empty cache rather than blocking startup.
    pub async fn bootstrap(settings: Settings, connector: Arc<dyn RoleConnector>) -> Self {
        let cache_path = settings.cache_path();
        let cache = CacheStore::load(&cache_path).await;
        tracing::info!(
            path = %cache_path.display(),
            players = cache.record_count(),
            "Cache loaded"
        );

        let hooks = HookHub::new();
        let audit = AuditSink::new(cache.clone(), hooks.clone());
        let tokens = LinkTokenService::new(settings.link_token_ttl());

        let bridge = RoleBridge::new(settings.clone(), connector);
        tracing::info!(
            configured = settings.bridge().is_some(),
            "Role bridge initialized"
        );

        let gate = PermissionGate::new(
            cache.clone(),
            tokens.clone(),
            Arc::new(bridge.clone()),
            settings.clone(),
            audit.clone(),
            hooks.clone(),
        );
        let admin = AdminService::new(
            cache.clone(),
            tokens.clone(),
            settings.clone(),
            audit.clone(),
            hooks.clone(),
        );

        let sweeper = CancellationToken::new();
        spawn_token_sweeper(tokens.clone(), sweeper.clone());

        tracing::info!("Permission gate engine ready");
        Self {
            settings,
            cache,
            tokens,
            bridge,
            gate,
            admin,
            audit,
            hooks,
            sweeper,
        }
    }

    /// Orderly teardown: stop the sweeper, take the bridge offline, then
    /// flush the cache to disk. Safe to call on a half-started engine.
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.sweeper.cancel();
        self.bridge.shutdown().await;
        self.cache.close().await;
        tracing::info!("Engine shutdown complete");
    }
}

fn spawn_token_sweeper(tokens: LinkTokenService, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Token sweeper shutting down");
                    break;
                }
                _ = tick.tick() => {
                    let evicted = tokens.sweep_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "Expired link tokens removed");
                    }
                }
            }
        }
    });
}
