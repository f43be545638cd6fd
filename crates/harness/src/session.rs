use std::sync::Arc;

use lessonsync_core::{LessonData, LessonNumber, Partition, TenantId};
use lessonsync_engine::{logging, Engine, EngineConfig, EngineError, SyncGateway};
use lessonsync_storage::{MemoryCache, MemoryRemote, RemoteStore};

pub const TENANT: &str = "teacher-1";
pub const COLLECTION: &str = "LKG";
pub const YEAR: &str = "2024-2025";

/// One engine over in-memory backends. The cache and remote handles are
/// shared, so tests can inject failures and inspect what was written.
pub struct TestSession {
    pub engine: Engine,
    pub cache: MemoryCache,
    pub remote: Option<Arc<MemoryRemote>>,
    pub partition: Partition,
}

impl TestSession {
    /// LKG 2024-2025 with a working remote.
    pub async fn new() -> Result<Self, EngineError> {
        Self::build(MemoryCache::new(), Some(Arc::new(MemoryRemote::new())), COLLECTION, YEAR).await
    }

    /// No remote configured at all.
    pub async fn offline() -> Result<Self, EngineError> {
        Self::build(MemoryCache::new(), None, COLLECTION, YEAR).await
    }

    pub async fn build(
        cache: MemoryCache,
        remote: Option<Arc<MemoryRemote>>,
        collection: &str,
        year: &str,
    ) -> Result<Self, EngineError> {
        let config = EngineConfig {
            tenant_id: TENANT.to_string(),
            active_academic_year: year.to_string(),
            local_cache_path: ":memory:".to_string(),
            ..EngineConfig::default()
        };
        // One global subscriber per test binary; later installs are refused.
        let _ = logging::init(&config.log_filter);
        let gateway = SyncGateway::new(
            cache.clone(),
            remote.clone().map(|r| r as Arc<dyn RemoteStore>),
            TenantId::new(TENANT),
            config.event_buffer,
        )?;
        let partition = config.active_partition(collection)?;
        let mut engine = Engine::new(config, gateway);
        engine.load_library().await?;
        engine.open_partition(&partition).await?;
        Ok(Self {
            engine,
            cache,
            remote,
            partition,
        })
    }

    /// A second engine over the same cache and remote: a restart, or a
    /// concurrent writer if this one keeps being used.
    pub async fn reopen(&self, collection: &str, year: &str) -> Result<Self, EngineError> {
        Self::build(self.cache.clone(), self.remote.clone(), collection, year).await
    }

    pub fn tenant(&self) -> TenantId {
        TenantId::new(TENANT)
    }

    /// Both failure switches at once. No-op on an offline session.
    pub fn set_remote_down(&self, down: bool) {
        if let Some(remote) = &self.remote {
            remote.set_offline(down);
        }
    }

    pub fn lesson(&self, number: u32) -> Option<&LessonData> {
        let number = LessonNumber::new(number).ok()?;
        self.engine.lessons().get(&self.partition, number)
    }

    pub fn numbers(&self) -> Vec<u32> {
        self.engine
            .lessons()
            .list_numbers(&self.partition)
            .into_iter()
            .map(LessonNumber::get)
            .collect()
    }
}
