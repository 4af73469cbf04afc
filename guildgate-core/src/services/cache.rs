//! Durable cache of identity records, whitelist applications and the audit
//! ledger.
//!
//! The in-memory state is authoritative for every decision; the JSON file is
//! write-behind durability. Mutations go through `enqueue_save`, which a
//! background scheduler collapses into one disk write per quiet window.
//! `flush_saves` forces any pending write out, for shutdown and tests.
//!
//! On-disk writes rotate the previous file to a `.bak` sibling and land the
//! new snapshot via a temp file rename, so a crash mid-write always leaves
//! one readable generation behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::GateError;
use crate::models::{ApplicationStatus, AuditEvent, IdentityRecord, WhitelistApplication};

/// Quiet window that collapses bursts of `enqueue_save` into one write.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(2);
const SCHEDULER_QUEUE: usize = 64;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheState {
    #[serde(default)]
    records: HashMap<Uuid, IdentityRecord>,
    #[serde(default)]
    applications: HashMap<Uuid, WhitelistApplication>,
    #[serde(default)]
    events: Vec<AuditEvent>,
}

enum SaveMsg {
    Queue(PathBuf),
    Flush(oneshot::Sender<()>),
}

/// Shared handle to the cache. Cloning is cheap; all clones see one state.
#[derive(Clone)]
pub struct CacheStore {
    state: Arc<RwLock<CacheState>>,
    // Serializes file writes; in-memory reads stay lock-free of this.
    file_lock: Arc<Mutex<()>>,
    scheduler: mpsc::Sender<SaveMsg>,
    shutdown: CancellationToken,
}

impl CacheStore {
    /// Empty store with a running save scheduler. Must be called from within
    /// a tokio runtime.
    pub fn new() -> Self {
        Self::from_state(CacheState::default())
    }

    /// Read the cache file, falling back to the `.bak` sibling when the
    /// primary is missing or corrupt. Never fails: an unreadable pair starts
    /// the engine with an empty cache rather than blocking startup.
    pub async fn load(path: &Path) -> Self {
        let backup = sibling_path(path, "bak");
        let state = match read_state(path).await {
            Ok(Some(state)) => {
                tracing::info!(path = %path.display(), "Cache loaded");
                state
            }
            Ok(None) => match read_state(&backup).await {
                Ok(Some(state)) => {
                    tracing::warn!(
                        path = %backup.display(),
                        "Primary cache missing; recovered from backup"
                    );
                    state
                }
                _ => {
                    tracing::info!(path = %path.display(), "No cache file yet; starting empty");
                    CacheState::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Primary cache unreadable; trying backup"
                );
                match read_state(&backup).await {
                    Ok(Some(state)) => {
                        tracing::info!(path = %backup.display(), "Recovered cache from backup");
                        state
                    }
                    Ok(None) => {
                        tracing::error!(
                            path = %path.display(),
                            "No backup available; starting with an empty cache"
                        );
                        CacheState::default()
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            path = %backup.display(),
                            error = %backup_err,
                            "Backup also unreadable; starting with an empty cache"
                        );
                        CacheState::default()
                    }
                }
            }
        };
        Self::from_state(state)
    }

    fn from_state(state: CacheState) -> Self {
        let state = Arc::new(RwLock::new(state));
        let file_lock = Arc::new(Mutex::new(()));
        let (tx, rx) = mpsc::channel(SCHEDULER_QUEUE);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_scheduler(
            Arc::clone(&state),
            Arc::clone(&file_lock),
            rx,
            shutdown.clone(),
        ));

        Self {
            state,
            file_lock,
            scheduler: tx,
            shutdown,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- identity records ----

    pub fn upsert(&self, record: IdentityRecord) {
        self.write().records.insert(record.player_id, record);
    }

    pub fn get(&self, player_id: Uuid) -> Option<IdentityRecord> {
        self.read().records.get(&player_id).cloned()
    }

    pub fn find_by_community_id(&self, community_id: u64) -> Option<IdentityRecord> {
        self.read()
            .records
            .values()
            .find(|r| r.community_id == Some(community_id))
            .cloned()
    }

    /// Case-insensitive lookup by last observed player name.
    pub fn find_by_name(&self, player_name: &str) -> Option<IdentityRecord> {
        self.read()
            .records
            .values()
            .find(|r| {
                r.player_name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(player_name))
            })
            .cloned()
    }

    pub fn records(&self) -> Vec<IdentityRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn record_count(&self) -> usize {
        self.read().records.len()
    }

    // ---- audit ledger ----

    pub fn append_event(&self, event: AuditEvent) {
        self.write().events.push(event);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.read().events.clone()
    }

    pub fn events_for_player(&self, player_id: Uuid) -> Vec<AuditEvent> {
        self.read()
            .events
            .iter()
            .filter(|e| e.player_id == Some(player_id))
            .cloned()
            .collect()
    }

    // ---- whitelist applications ----

    /// Record an application. A community account with a pending application
    /// gets its existing one back instead of a duplicate; the returned flag
    /// says whether a new application was created.
    pub fn add_application(
        &self,
        community_id: u64,
        player_name: &str,
        player_id: Option<Uuid>,
    ) -> (WhitelistApplication, bool) {
        let mut state = self.write();
        if let Some(existing) = state
            .applications
            .values()
            .find(|a| a.community_id == community_id && a.is_pending())
        {
            return (existing.clone(), false);
        }
        let application = WhitelistApplication::new(community_id, player_name, player_id);
        state
            .applications
            .insert(application.id, application.clone());
        (application, true)
    }

    pub fn application(&self, id: Uuid) -> Option<WhitelistApplication> {
        self.read().applications.get(&id).cloned()
    }

    pub fn applications(&self) -> Vec<WhitelistApplication> {
        let mut all: Vec<_> = self.read().applications.values().cloned().collect();
        all.sort_by_key(|a| a.submitted_at);
        all
    }

    pub fn pending_application_for(&self, community_id: u64) -> Option<WhitelistApplication> {
        self.read()
            .applications
            .values()
            .find(|a| a.community_id == community_id && a.is_pending())
            .cloned()
    }

    /// Move an application to `Approved` or `Denied`.
    ///
    /// Repeating the same resolution is a no-op success (`changed == false`);
    /// flipping an already resolved application to the other status is an
    /// error. Only pending applications actually transition.
    pub fn resolve_application(
        &self,
        id: Uuid,
        status: ApplicationStatus,
        reason: Option<&str>,
    ) -> Result<(WhitelistApplication, bool), GateError> {
        if status == ApplicationStatus::Pending {
            return Err(GateError::Internal(anyhow::anyhow!(
                "applications cannot be resolved back to pending"
            )));
        }
        let mut state = self.write();
        let application = state
            .applications
            .get_mut(&id)
            .ok_or(GateError::ApplicationNotFound)?;
        if application.status == status {
            return Ok((application.clone(), false));
        }
        if !application.is_pending() {
            return Err(GateError::ApplicationAlreadyResolved);
        }
        application.status = status;
        application.resolution_reason = reason.map(str::to_string);
        application.resolved_at = Some(chrono::Utc::now());
        Ok((application.clone(), true))
    }

    // ---- persistence ----

    /// Write the current state to `path` immediately, bypassing the debounce.
    pub async fn save(&self, path: &Path) -> Result<(), GateError> {
        persist(&self.state, &self.file_lock, path).await
    }

    /// Ask the scheduler for a write after the debounce window. Multiple
    /// calls inside one window collapse into a single write; the latest path
    /// wins. Never blocks.
    pub fn enqueue_save(&self, path: impl Into<PathBuf>) {
        match self.scheduler.try_send(SaveMsg::Queue(path.into())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // A save is already queued; this mutation rides along with it.
                tracing::debug!("Save queue full; coalescing with pending save");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Save scheduler stopped; cache changes stay in memory only");
            }
        }
    }

    /// Block until every save enqueued before this call has hit the disk.
    pub async fn flush_saves(&self) {
        let (tx, rx) = oneshot::channel();
        if self.scheduler.send(SaveMsg::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Flush pending writes and stop the scheduler.
    pub async fn close(&self) {
        self.flush_saves().await;
        self.shutdown.cancel();
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_scheduler(
    state: Arc<RwLock<CacheState>>,
    file_lock: Arc<Mutex<()>>,
    mut rx: mpsc::Receiver<SaveMsg>,
    shutdown: CancellationToken,
) {
    let mut pending: Option<PathBuf> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let wait = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(path) = pending.take() {
                    if let Err(err) = persist(&state, &file_lock, &path).await {
                        tracing::error!(error = %err, "Final cache save failed during shutdown");
                    }
                }
                tracing::debug!("Save scheduler shutting down");
                break;
            }
            _ = wait => {
                deadline = None;
                if let Some(path) = pending.take() {
                    if let Err(err) = persist(&state, &file_lock, &path).await {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "Scheduled cache save failed; retrying on the next save"
                        );
                        // Stay dirty so the next enqueue retries this state.
                        pending = Some(path);
                    }
                }
            }
            msg = rx.recv() => match msg {
                Some(SaveMsg::Queue(path)) => {
                    pending = Some(path);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + SAVE_DEBOUNCE);
                    }
                }
                Some(SaveMsg::Flush(done)) => {
                    if let Some(path) = pending.take() {
                        if let Err(err) = persist(&state, &file_lock, &path).await {
                            tracing::warn!(
                                path = %path.display(),
                                error = %err,
                                "Flush-forced cache save failed; retrying on the next save"
                            );
                            pending = Some(path);
                        }
                    }
                    deadline = None;
                    let _ = done.send(());
                }
                None => {
                    if let Some(path) = pending.take() {
                        if let Err(err) = persist(&state, &file_lock, &path).await {
                            tracing::error!(error = %err, "Final cache save failed");
                        }
                    }
                    break;
                }
            }
        }
    }
}

/// Serialize a snapshot and write it with backup rotation. The state lock is
/// only held while cloning; serialization and IO run outside it.
async fn persist(
    state: &RwLock<CacheState>,
    file_lock: &Mutex<()>,
    path: &Path,
) -> Result<(), GateError> {
    let snapshot = state
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let json = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| GateError::Internal(anyhow::anyhow!("cache serialization failed: {e}")))?;

    let _guard = file_lock.lock().await;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    if fs::try_exists(path).await? {
        fs::rename(path, sibling_path(path, "bak")).await?;
    }

    let tmp = sibling_path(path, "tmp");
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;

    tracing::debug!(
        path = %path.display(),
        bytes = json.len(),
        records = snapshot.records.len(),
        "Cache snapshot written"
    );
    Ok(())
}

async fn read_state(path: &Path) -> Result<Option<CacheState>, GateError> {
    match fs::read(path).await {
        Ok(bytes) => {
            let state = serde_json::from_slice(&bytes).map_err(GateError::CacheCorrupt)?;
            Ok(Some(state))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// `cache.json` -> `cache.json.bak`, appended rather than replacing the
/// extension so the primary and its siblings sort together.
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
