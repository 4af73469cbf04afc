//! End-to-end workflow tests for the permission gate engine.
//!
//! Each test boots the full engine (cache store, link tokens, role bridge,
//! gate, admin service) over a temporary directory and a scripted community
//! connector, then drives it through the call sequences a host server would:
//! logins, joins, link redemptions, admin commands, restarts.
//!
//! ## Usage
//!
//! ```bash
//! cargo test -p workflow-tests
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};

use anyhow::Result;
use tempfile::TempDir;
use uuid::Uuid;

use guildgate_core::config::{Settings, SettingsData};
use guildgate_core::services::{
    JoinAttempt, JoinOutcome, LoginAttempt, LoginDecision, MockConnector,
};
use guildgate_core::GateEngine;

// Re-export what test scenarios reach for constantly.
pub use guildgate_core::config::Enforcement;
pub use guildgate_core::models::AuditKind;
pub use guildgate_core::services::MemberRole;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,guildgate_core=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A running engine plus the scripted connector behind its bridge and a
/// capture of every chat notice the engine sends.
///
/// Each harness owns its own temporary directory, so tests are isolated and
/// the cache file can be inspected or reloaded mid-test.
pub struct GateHarness {
    pub engine: GateEngine,
    pub connector: Arc<MockConnector>,
    pub notices: Arc<Mutex<Vec<(Uuid, String)>>>,
    dir: TempDir,
}

impl GateHarness {
    /// Boot an engine in active enforcement with bridge credentials
    /// configured. The bridge is constructed stopped; call
    /// [`GateHarness::start_bridge`] to go online.
    pub async fn new() -> Result<Self> {
        Self::with_enforcement(Enforcement::Active).await
    }

    pub async fn with_enforcement(enforcement: Enforcement) -> Result<Self> {
        init_tracing();

        let dir = TempDir::new()?;
        let mut data = SettingsData::default();
        data.cache_path = dir.path().join("gate-cache.json");
        data.community_token = "workflow-test-token".to_string();
        data.community_group_id = Some(7777);
        data.enforcement = enforcement;
        let settings = Settings::new(data);

        let connector = Arc::new(MockConnector::new());
        let role_source: Arc<dyn guildgate_core::services::RoleConnector> = connector.clone();
        let engine = GateEngine::bootstrap(settings, role_source).await;
        let notices = capture_notices(&engine);

        Ok(Self {
            engine,
            connector,
            notices,
            dir,
        })
    }

    pub async fn start_bridge(&self) -> Result<()> {
        self.engine.bridge.start().await?;
        Ok(())
    }

    /// Shut the engine down and boot a fresh one over the same cache
    /// directory and connector, as a server restart would.
    pub async fn restart(&mut self) {
        self.engine.shutdown().await;
        let settings = self.engine.settings.clone();
        let role_source: Arc<dyn guildgate_core::services::RoleConnector> =
            self.connector.clone();
        let engine = GateEngine::bootstrap(settings, role_source).await;
        self.notices = capture_notices(&engine);
        self.engine = engine;
    }

    pub fn cache_file(&self) -> PathBuf {
        self.dir.path().join("gate-cache.json")
    }

    // ---- drive helpers ----

    pub async fn login(&self, player_id: Uuid, name: &str) -> LoginDecision {
        self.engine
            .gate
            .decide_login(LoginAttempt {
                player_id,
                player_name: name.to_string(),
                privileged: false,
                legacy_granted: false,
            })
            .await
    }

    /// Login of a player still carried by the host's old allow-list.
    pub async fn legacy_login(&self, player_id: Uuid, name: &str) -> LoginDecision {
        self.engine
            .gate
            .decide_login(LoginAttempt {
                player_id,
                player_name: name.to_string(),
                privileged: false,
                legacy_granted: true,
            })
            .await
    }

    pub async fn privileged_login(&self, player_id: Uuid, name: &str) -> LoginDecision {
        self.engine
            .gate
            .decide_login(LoginAttempt {
                player_id,
                player_name: name.to_string(),
                privileged: true,
                legacy_granted: false,
            })
            .await
    }

    pub async fn join(&self, player_id: Uuid, name: &str) -> JoinOutcome {
        self.engine
            .gate
            .decide_join(JoinAttempt {
                player_id,
                player_name: name.to_string(),
                privileged: false,
            })
            .await
    }

    // ---- observation helpers ----

    /// The link code currently issued to a player, if one is outstanding.
    pub fn issued_code_for(&self, player_id: Uuid) -> Option<String> {
        self.engine
            .tokens
            .active()
            .into_iter()
            .find(|t| t.player_id == player_id)
            .map(|t| t.code)
    }

    /// Latest chat notice delivered to a player.
    pub fn last_notice_for(&self, player_id: Uuid) -> Option<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| *id == player_id)
            .map(|(_, text)| text.clone())
    }

    /// Audit kinds recorded for a player, oldest first.
    pub fn audit_kinds_for(&self, player_id: Uuid) -> Vec<AuditKind> {
        self.engine
            .cache
            .events_for_player(player_id)
            .iter()
            .map(|e| e.kind)
            .collect()
    }
}

fn capture_notices(engine: &GateEngine) -> Arc<Mutex<Vec<(Uuid, String)>>> {
    let notices: Arc<Mutex<Vec<(Uuid, String)>>> = Arc::default();
    let sink = Arc::clone(&notices);
    engine.hooks.register_messenger(move |player_id, text| {
        sink.lock().unwrap().push((player_id, text.to_string()));
    });
    notices
}
