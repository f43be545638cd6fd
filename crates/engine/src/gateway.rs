//! Local-first write path with a best-effort remote mirror.
//!
//! Every mutation lands in the local cache synchronously, as one atomic
//! batch. Only after that succeeds is the remote leg spawned; its outcome is
//! logged, counted, and broadcast as a [`SyncEvent`] but never returned to
//! the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lessonsync_core::TenantId;
use lessonsync_storage::{CacheEntry, LessonSheet, LocalCache, RemoteStore, StorageError, WriteBatch};

use crate::error::EngineError;

/// Values that can be loaded through [`SyncGateway::load`].
pub trait Snapshot: Serialize + DeserializeOwned {
    /// An empty remote result does not count as data.
    fn is_empty_snapshot(&self) -> bool;
}

impl<T: Serialize + DeserializeOwned> Snapshot for Vec<T> {
    fn is_empty_snapshot(&self) -> bool {
        self.is_empty()
    }
}

impl Snapshot for LessonSheet {
    fn is_empty_snapshot(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RemoteSynced { operation: &'static str },
    RemoteFailed { operation: &'static str, error: String },
    Loaded { key: String, source: LoadSource },
    LoadFailed { key: String, error: String },
}

/// What a remote closure gets to work with.
#[derive(Clone)]
pub struct RemoteCtx {
    pub store: Arc<dyn RemoteStore>,
    pub tenant: TenantId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
}

#[derive(Default)]
struct Counters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl Counters {
    fn record(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> SyncStats {
        SyncStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    local: Mutex<Box<dyn LocalCache>>,
    /// Last revision seen per key. Writes to a known key are conditional on it.
    revisions: Mutex<HashMap<String, u64>>,
    remote: Option<Arc<dyn RemoteStore>>,
    tenant: TenantId,
    runtime: Handle,
    events: broadcast::Sender<SyncEvent>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

/// Cheap to clone; every store holds one.
#[derive(Clone)]
pub struct SyncGateway {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncGateway {
    /// Binds to the current tokio runtime.
    pub fn new(
        local: impl LocalCache + 'static,
        remote: Option<Arc<dyn RemoteStore>>,
        tenant: TenantId,
        event_buffer: usize,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;
        Ok(Self::with_handle(local, remote, tenant, event_buffer, runtime))
    }

    pub fn with_handle(
        local: impl LocalCache + 'static,
        remote: Option<Arc<dyn RemoteStore>>,
        tenant: TenantId,
        event_buffer: usize,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                local: Mutex::new(Box::new(local)),
                revisions: Mutex::new(HashMap::new()),
                remote,
                tenant,
                runtime,
                events,
                pending: Mutex::new(Vec::new()),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.inner.tenant
    }

    pub fn is_offline(&self) -> bool {
        self.inner.remote.is_none()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.counters.snapshot()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn remote_ctx(&self) -> Option<RemoteCtx> {
        self.inner.remote.as_ref().map(|store| RemoteCtx {
            store: Arc::clone(store),
            tenant: self.inner.tenant.clone(),
        })
    }

    fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, EngineError> {
        let entry = lock(&self.inner.local).get(key)?;
        let revision = entry.as_ref().map_or(0, |e| e.revision);
        lock(&self.inner.revisions).insert(key.to_string(), revision);
        Ok(entry)
    }

    /// Reads and decodes one key from the local cache.
    pub fn read_local<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, EngineError> {
        match self.read_entry(key)? {
            Some(entry) => Ok(Some(
                serde_json::from_value(entry.value).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    /// Applies `batch` to the local cache. Entries for keys this gateway has
    /// read or written are guarded by the last revision it saw, so a write
    /// based on stale state fails as a whole.
    pub fn commit_local(&self, mut batch: WriteBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut revisions = lock(&self.inner.revisions);
        for entry in batch.entries_mut() {
            if entry.expected_revision.is_none() {
                entry.expected_revision = revisions.get(&entry.key).copied();
            }
        }
        let applied = lock(&self.inner.local).apply(&batch)?;
        for (key, revision) in applied {
            revisions.insert(key, revision);
        }
        Ok(())
    }

    /// Commits `batch` locally, then mirrors it through `remote` in the
    /// background. Only the local leg can fail the call.
    pub fn write<F, Fut>(
        &self,
        operation: &'static str,
        batch: WriteBatch,
        remote: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(RemoteCtx) -> Fut,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        self.commit_local(batch)?;
        self.mirror(operation, remote);
        Ok(())
    }

    /// Spawns a remote-only task. A no-op when offline.
    pub fn mirror<F, Fut>(&self, operation: &'static str, remote: F)
    where
        F: FnOnce(RemoteCtx) -> Fut,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let Some(ctx) = self.remote_ctx() else {
            debug!(operation, "offline, remote mirror skipped");
            return;
        };
        let task = remote(ctx);
        let counters = Arc::clone(&self.inner.counters);
        let events = self.inner.events.clone();
        counters.attempted.fetch_add(1, Ordering::Relaxed);

        let handle = self.inner.runtime.spawn(async move {
            match task.await {
                Ok(()) => {
                    counters.record(true);
                    debug!(operation, "remote mirror ok");
                    let _ = events.send(SyncEvent::RemoteSynced { operation });
                }
                Err(error) => {
                    counters.record(false);
                    warn!(operation, %error, "remote mirror failed, local copy kept");
                    let _ = events.send(SyncEvent::RemoteFailed {
                        operation,
                        error: error.to_string(),
                    });
                }
            }
        });

        let mut pending = lock(&self.inner.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Waits for every remote task spawned so far.
    pub async fn flush(&self) {
        loop {
            let handles = std::mem::take(&mut *lock(&self.inner.pending));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(error) = handle.await {
                    warn!(%error, "remote mirror task panicked");
                }
            }
        }
    }

    /// Remote first, then the local cache, then `default`. Remote data
    /// refreshes the local copy; a default is persisted so the next start
    /// reads it back.
    pub async fn load<T, F, Fut, D>(&self, key: &str, fetch: F, default: D) -> Result<T, EngineError>
    where
        T: Snapshot,
        F: FnOnce(RemoteCtx) -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
        D: FnOnce() -> Result<T, EngineError>,
    {
        let local = self.read_entry(key)?;

        if let Some(ctx) = self.remote_ctx() {
            match fetch(ctx).await {
                Ok(Some(value)) if !value.is_empty_snapshot() => {
                    let mut batch = WriteBatch::new();
                    batch.put_json(key, &value)?;
                    self.commit_local(batch)?;
                    debug!(key, "loaded from remote");
                    self.emit(SyncEvent::Loaded {
                        key: key.to_string(),
                        source: LoadSource::Remote,
                    });
                    return Ok(value);
                }
                Ok(_) => debug!(key, "remote has nothing, trying local cache"),
                Err(error) => {
                    warn!(key, %error, "remote load failed, using local cache");
                    self.emit(SyncEvent::LoadFailed {
                        key: key.to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }

        if let Some(entry) = local {
            let value: T = serde_json::from_value(entry.value).map_err(StorageError::from)?;
            debug!(key, revision = entry.revision, "loaded from local cache");
            self.emit(SyncEvent::Loaded {
                key: key.to_string(),
                source: LoadSource::Local,
            });
            return Ok(value);
        }

        let value = default()?;
        let mut batch = WriteBatch::new();
        batch.put_json(key, &value)?;
        self.commit_local(batch)?;
        debug!(key, "initialized with defaults");
        self.emit(SyncEvent::Loaded {
            key: key.to_string(),
            source: LoadSource::Default,
        });
        Ok(value)
    }
}
