//! Local key-value store backing every persisted record.
//!
//! One SQLite connection lives on a dedicated thread; callers send it closures
//! and await the reply. Because every operation runs to completion on that one
//! thread, a read-check-delete inside a single task is atomic with respect to
//! every other observer sharing the store.

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, oneshot};

pub mod keys;
mod migrations;

use migrations::run_migrations;

use crate::error::StoreError;
use crate::models::FocusSession;

pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_SESSION_RETENTION: usize = 50;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Upper bound on the summed size of all keys and values. Zero disables it.
    pub quota_bytes: u64,
    /// Sessions kept when history is pruned under quota pressure.
    pub session_retention: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_QUOTA_BYTES,
            session_retention: DEFAULT_SESSION_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    pub kind: ChangeKind,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    options: StoreOptions,
    changes: broadcast::Sender<StoreChange>,
}

impl Store {
    pub fn open(path: PathBuf, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let path_for_thread = path.clone();
        let store = Self::spawn(
            move || Connection::open(&path_for_thread),
            true,
            options,
        )?;
        info!("Store initialized at {}", path.display());
        Ok(store)
    }

    pub fn in_memory(options: StoreOptions) -> Result<Self> {
        Self::spawn(Connection::open_in_memory, false, options)
    }

    fn spawn<F>(open: F, on_disk: bool, options: StoreOptions) -> Result<Self>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("clarityhub-store".into())
            .spawn(move || {
                let mut conn = match open() {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if on_disk {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        let (changes, _) = broadcast::channel(64);

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            options,
            changes,
        })
    }

    /// Change feed for observers that prefer notifications over polling.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| StoreError::Unavailable(format!("store thread gone: {err}")))?;

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store thread terminated unexpectedly".into()))?
    }

    fn publish(&self, key: &str, kind: ChangeKind) {
        // No receivers is the common case.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            kind,
        });
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn set_raw(&self, key: &str, value: String) -> Result<(), StoreError> {
        let key_owned = key.to_string();
        let quota = self.options.quota_bytes;
        let size_bytes = (key_owned.len() + value.len()) as i64;
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            if quota > 0 {
                let others: i64 = tx.query_row(
                    "SELECT COALESCE(SUM(size_bytes), 0) FROM kv WHERE key <> ?1",
                    params![key_owned],
                    |row| row.get(0),
                )?;
                let needed = others.max(0) as u64 + size_bytes as u64;
                if needed > quota {
                    return Err(StoreError::QuotaExceeded { needed, quota });
                }
            }
            tx.execute(
                "INSERT INTO kv (key, value, size_bytes, updated_at)
                 VALUES (?1, ?2, ?3, CAST(strftime('%s', 'now') AS INTEGER) * 1000)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                     size_bytes = excluded.size_bytes, updated_at = excluded.updated_at",
                params![key_owned, value, size_bytes],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.publish(key, ChangeKind::Set);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_many(&[key]).await
    }

    pub async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let owned: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let removed = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = Vec::new();
                for key in owned {
                    if tx.execute("DELETE FROM kv WHERE key = ?1", params![key])? > 0 {
                        removed.push(key);
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        for key in removed {
            self.publish(&key, ChangeKind::Removed);
        }
        Ok(())
    }

    /// Atomically removes and returns the value under `key` if `predicate`
    /// accepts it. Of several observers racing for the same record exactly one
    /// gets `Some`.
    pub async fn take_raw_if<P>(&self, key: &str, predicate: P) -> Result<Option<String>, StoreError>
    where
        P: FnOnce(&str) -> bool + Send + 'static,
    {
        let key_owned = key.to_string();
        let taken = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let current = tx
                    .query_row(
                        "SELECT value FROM kv WHERE key = ?1",
                        params![key_owned],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                let taken = match current {
                    Some(value) if predicate(&value) => {
                        tx.execute("DELETE FROM kv WHERE key = ?1", params![key_owned])?;
                        Some(value)
                    }
                    _ => None,
                };
                tx.commit()?;
                Ok(taken)
            })
            .await?;
        if taken.is_some() {
            self.publish(key, ChangeKind::Removed);
        }
        Ok(taken)
    }

    /// Typed read. Missing, unreadable and malformed values all read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get_raw(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("Ignoring corrupt value under '{key}': {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                error!("Failed to read '{key}': {err}");
                None
            }
        }
    }

    /// Typed write. A quota failure prunes old session history and retries once.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = to_json(value)?;
        match self.set_raw(key, raw.clone()).await {
            Err(err) if err.is_quota() => {
                warn!("Quota hit writing '{key}': {err}; pruning session history");
                match self.prune_history().await {
                    Ok(pruned) => info!("Pruned {pruned} old sessions"),
                    Err(prune_err) => error!("Failed to prune session history: {prune_err}"),
                }
                self.set_raw(key, raw).await
            }
            other => other,
        }
    }

    /// Typed variant of [`Store::take_raw_if`]. Malformed values are never taken.
    pub async fn take_if<T, P>(&self, key: &str, predicate: P) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + 'static,
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        let taken = self
            .take_raw_if(key, move |raw| {
                serde_json::from_str::<T>(raw)
                    .map(|value| predicate(&value))
                    .unwrap_or(false)
            })
            .await?;
        Ok(taken.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub async fn load_history(&self) -> Vec<FocusSession> {
        self.get(keys::DEEPWORK_SESSIONS).await.unwrap_or_default()
    }

    /// Prepends a session to the newest-first history. Under quota pressure the
    /// history is cut to the retention count and written once more.
    pub async fn append_session(&self, session: FocusSession) -> Result<(), StoreError> {
        let mut history = self.load_history().await;
        history.insert(0, session);

        match self.set_raw(keys::DEEPWORK_SESSIONS, to_json(&history)?).await {
            Err(err) if err.is_quota() => {
                warn!(
                    "Quota hit appending session: {err}; keeping newest {}",
                    self.options.session_retention
                );
                history.truncate(self.options.session_retention.max(1));
                self.set_raw(keys::DEEPWORK_SESSIONS, to_json(&history)?)
                    .await
            }
            other => other,
        }
    }

    pub async fn prune_history(&self) -> Result<usize, StoreError> {
        let mut history = self.load_history().await;
        let keep = self.options.session_retention;
        if history.len() <= keep {
            return Ok(0);
        }
        let pruned = history.len() - keep;
        history.truncate(keep);
        self.set_raw(keys::DEEPWORK_SESSIONS, to_json(&history)?)
            .await?;
        Ok(pruned)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|err| StoreError::Unavailable(format!("failed to serialize value: {err}")))
}
