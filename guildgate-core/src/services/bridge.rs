//! Lifecycle-managed bridge to the remote role authority.
//!
//! All lifecycle commands (start, stop, reload) funnel through one command
//! loop, so transitions are strictly serialized and never race. Connection
//! opening is slow and runs on a spawned task; every spawned open is stamped
//! with the generation current at spawn time, and a completion whose stamp
//! no longer matches is discarded. Stopping bumps the generation, which is
//! what makes `stop` cancel an in-flight `start`.
//!
//! Role checks deliberately bypass the loop: they only need a started
//! connection and must not queue behind lifecycle work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeSettings, Settings};
use crate::error::GateError;

const COMMAND_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Starting,
    Started,
    Stopping,
    /// Configuration is incomplete; the bridge reports startup success but
    /// never opens a connection.
    Disabled,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Stopped => "stopped",
            BridgeState::Starting => "starting",
            BridgeState::Started => "started",
            BridgeState::Stopping => "stopping",
            BridgeState::Disabled => "disabled",
        }
    }
}

/// What the remote authority said about one community account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// In the group and holding the gating role.
    Holds,
    /// In the group without the gating role.
    Lacks,
    /// Not in the group at all.
    Absent,
}

/// Outcome of a bounded role check, as consumed by decision logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleStatus {
    HasRole,
    MissingRole,
    NotInGroup,
    /// The answer could not be obtained: bridge down, timeout or remote
    /// error. Decision logic must not punish anyone for this.
    Indeterminate,
}

/// Transport adapter to the community platform. Implementations own the
/// network client; the bridge owns when it is opened and closed.
#[async_trait]
pub trait RoleConnector: Send + Sync {
    async fn open(&self, settings: &BridgeSettings) -> Result<(), GateError>;
    async fn close(&self);
    async fn member_role(&self, community_id: u64) -> Result<MemberRole, GateError>;
}

/// The seam decision logic depends on. Production wires [`RoleBridge`] in;
/// tests substitute fixed answers without running a command loop.
#[async_trait]
pub trait RoleCheck: Send + Sync {
    fn is_started(&self) -> bool;
    async fn check_role(&self, community_id: u64) -> RoleStatus;
}

enum BridgeCmd {
    Start(oneshot::Sender<Result<(), GateError>>),
    Stop(oneshot::Sender<()>),
    Reload(oneshot::Sender<Result<(), GateError>>),
    StartFinished {
        generation: u64,
        outcome: Result<(), String>,
    },
}

/// Handle to the bridge. Cheap to clone; all clones drive one command loop.
#[derive(Clone)]
pub struct RoleBridge {
    tx: mpsc::Sender<BridgeCmd>,
    shared: Arc<RwLock<BridgeState>>,
    connector: Arc<dyn RoleConnector>,
    settings: Settings,
    shutdown: CancellationToken,
}

impl RoleBridge {
    /// Spawn the command loop. Must be called from within a tokio runtime.
    pub fn new(settings: Settings, connector: Arc<dyn RoleConnector>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let shared = Arc::new(RwLock::new(BridgeState::Stopped));
        let shutdown = CancellationToken::new();

        let actor = BridgeActor {
            connector: Arc::clone(&connector),
            settings: settings.clone(),
            shared: Arc::clone(&shared),
            tx: tx.clone(),
            generation: 0,
            start_waiters: Vec::new(),
        };
        tokio::spawn(actor.run(rx, shutdown.clone()));

        Self {
            tx,
            shared,
            connector,
            settings,
            shutdown,
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the bridge up. Succeeds immediately when already started, waits
    /// alongside an in-flight start, and reports success without connecting
    /// when the bridge is unconfigured.
    pub async fn start(&self) -> Result<(), GateError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(BridgeCmd::Start(reply))
            .await
            .map_err(|_| GateError::BridgeStopped)?;
        done.await.map_err(|_| GateError::BridgeStopped)?
    }

    /// Tear the connection down. Cancels an in-flight start; a stop of an
    /// already stopped bridge is a no-op.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(BridgeCmd::Stop(reply)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Stop, re-read the bridge configuration on the loop task, and start
    /// again if the new configuration is complete.
    pub async fn reload(&self) -> Result<(), GateError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(BridgeCmd::Reload(reply))
            .await
            .map_err(|_| GateError::BridgeStopped)?;
        done.await.map_err(|_| GateError::BridgeStopped)?
    }

    /// Stop the bridge and end the command loop. For engine shutdown.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RoleCheck for RoleBridge {
    fn is_started(&self) -> bool {
        self.state() == BridgeState::Started
    }

    async fn check_role(&self, community_id: u64) -> RoleStatus {
        if !self.is_started() {
            tracing::debug!(community_id, "Role check skipped; bridge not started");
            return RoleStatus::Indeterminate;
        }
        let bound = self.settings.role_check_timeout();
        match tokio::time::timeout(bound, self.connector.member_role(community_id)).await {
            Ok(Ok(MemberRole::Holds)) => RoleStatus::HasRole,
            Ok(Ok(MemberRole::Lacks)) => RoleStatus::MissingRole,
            Ok(Ok(MemberRole::Absent)) => RoleStatus::NotInGroup,
            Ok(Err(err)) => {
                tracing::warn!(
                    community_id,
                    error = %err,
                    "Role check failed; treating as indeterminate"
                );
                RoleStatus::Indeterminate
            }
            Err(_) => {
                tracing::warn!(
                    community_id,
                    timeout_secs = bound.as_secs(),
                    "Role check timed out; treating as indeterminate"
                );
                RoleStatus::Indeterminate
            }
        }
    }
}

struct BridgeActor {
    connector: Arc<dyn RoleConnector>,
    settings: Settings,
    shared: Arc<RwLock<BridgeState>>,
    tx: mpsc::Sender<BridgeCmd>,
    generation: u64,
    start_waiters: Vec<oneshot::Sender<Result<(), GateError>>>,
}

impl BridgeActor {
    async fn run(mut self, mut rx: mpsc::Receiver<BridgeCmd>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.halt().await;
                    tracing::debug!("Bridge command loop shutting down");
                    break;
                }
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        self.halt().await;
                        break;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, cmd: BridgeCmd) {
        match cmd {
            BridgeCmd::Start(reply) => self.handle_start(reply).await,
            BridgeCmd::Stop(reply) => {
                self.halt().await;
                let _ = reply.send(());
            }
            BridgeCmd::Reload(reply) => self.handle_reload(reply).await,
            BridgeCmd::StartFinished {
                generation,
                outcome,
            } => self.handle_start_finished(generation, outcome).await,
        }
    }

    fn state(&self) -> BridgeState {
        *self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: BridgeState) {
        let mut state = self.shared.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::info!(from = state.as_str(), to = next.as_str(), "Bridge state changed");
            *state = next;
        }
    }

    async fn handle_start(&mut self, reply: oneshot::Sender<Result<(), GateError>>) {
        let Some(cfg) = self.settings.bridge() else {
            self.halt().await;
            self.set_state(BridgeState::Disabled);
            tracing::info!("Role bridge unconfigured; reporting started but staying disabled");
            let _ = reply.send(Ok(()));
            return;
        };
        match self.state() {
            BridgeState::Started => {
                let _ = reply.send(Ok(()));
            }
            BridgeState::Starting => {
                self.start_waiters.push(reply);
            }
            BridgeState::Stopped | BridgeState::Stopping | BridgeState::Disabled => {
                self.begin_start(cfg, reply);
            }
        }
    }

    async fn handle_reload(&mut self, reply: oneshot::Sender<Result<(), GateError>>) {
        tracing::info!("Role bridge reloading");
        self.halt().await;
        match self.settings.bridge() {
            None => {
                self.set_state(BridgeState::Disabled);
                tracing::info!("Role bridge unconfigured after reload; staying disabled");
                let _ = reply.send(Ok(()));
            }
            Some(cfg) => self.begin_start(cfg, reply),
        }
    }

    fn begin_start(&mut self, cfg: BridgeSettings, reply: oneshot::Sender<Result<(), GateError>>) {
        self.generation += 1;
        let generation = self.generation;
        self.set_state(BridgeState::Starting);
        self.start_waiters.push(reply);
        tracing::info!(generation, group_id = cfg.group_id, "Role bridge starting");

        let connector = Arc::clone(&self.connector);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = connector.open(&cfg).await.map_err(|e| e.to_string());
            let _ = tx
                .send(BridgeCmd::StartFinished {
                    generation,
                    outcome,
                })
                .await;
        });
    }

    async fn handle_start_finished(&mut self, generation: u64, outcome: Result<(), String>) {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "Discarding stale bridge start result"
            );
            // A stale successful open holds a session nobody owns. Close it
            // unless a newer open is already re-initializing the connector.
            if outcome.is_ok() && self.state() != BridgeState::Starting {
                self.connector.close().await;
            }
            return;
        }
        if self.state() != BridgeState::Starting {
            tracing::debug!(
                state = self.state().as_str(),
                "Ignoring start result outside the starting state"
            );
            return;
        }
        match outcome {
            Ok(()) => {
                self.set_state(BridgeState::Started);
                tracing::info!(generation, "Role bridge started");
                for waiter in self.start_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(message) => {
                self.set_state(BridgeState::Stopped);
                tracing::error!(generation, error = %message, "Role bridge failed to start");
                for waiter in self.start_waiters.drain(..) {
                    let _ = waiter.send(Err(GateError::BridgeStartFailed(message.clone())));
                }
            }
        }
    }

    /// Cancel any in-flight start and close the connection if one exists.
    async fn halt(&mut self) {
        match self.state() {
            BridgeState::Starting | BridgeState::Started => {
                self.generation += 1;
                for waiter in self.start_waiters.drain(..) {
                    let _ = waiter.send(Err(GateError::BridgeStopped));
                }
                self.set_state(BridgeState::Stopping);
                self.connector.close().await;
                self.set_state(BridgeState::Stopped);
            }
            BridgeState::Disabled => self.set_state(BridgeState::Stopped),
            BridgeState::Stopped | BridgeState::Stopping => {}
        }
    }
}

/// Connector stub backed by an in-memory member table. Used by tests and by
/// hosts running without a community platform attached.
#[derive(Default)]
pub struct MockConnector {
    members: DashMap<u64, MemberRole>,
    fail_open: AtomicBool,
    fail_lookups: AtomicBool,
    lookup_delay: RwLock<Option<std::time::Duration>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_member(&self, community_id: u64, role: MemberRole) {
        self.members.insert(community_id, role);
    }

    pub fn remove_member(&self, community_id: u64) {
        self.members.remove(&community_id);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn set_lookup_delay(&self, delay: Option<std::time::Duration>) {
        *self
            .lookup_delay
            .write()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleConnector for MockConnector {
    async fn open(&self, _settings: &BridgeSettings) -> Result<(), GateError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(GateError::BridgeStartFailed(
                "mock connector set to fail".to_string(),
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn member_role(&self, community_id: u64) -> Result<MemberRole, GateError> {
        let delay = *self
            .lookup_delay
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(GateError::Internal(anyhow::anyhow!(
                "mock lookup failure"
            )));
        }
        Ok(self
            .members
            .get(&community_id)
            .map(|r| *r.value())
            .unwrap_or(MemberRole::Absent))
    }
}
