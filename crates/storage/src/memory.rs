//! In-process backends. `MemoryCache` is a volatile local cache;
//! `MemoryRemote` is a tenant-scoped mirror with switchable
//! failure modes for offline scenarios.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use lessonsync_core::{
    Activity, ActivityStack, HalfTerm, LessonNumber, LessonPlan, PlanId, StackId, TenantId, Unit,
};

use crate::error::StorageError;
use crate::records::LessonSheet;
use crate::traits::{activity_natural_key, CacheEntry, LocalCache, RemoteStore, WriteBatch};

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<String, CacheEntry>,
    fail_writes: bool,
}

/// Cloning shares the underlying map, so two handles behave like two
/// processes against the same cache file.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("local cache lock poisoned".into()))
    }

    /// Makes every subsequent `apply` fail, e.g. a full quota.
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_writes = fail;
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn apply(&mut self, batch: &WriteBatch) -> Result<Vec<(String, u64)>, StorageError> {
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(StorageError::Unavailable("local cache rejected write".into()));
        }

        // Validate everything before touching the map.
        for entry in batch.entries() {
            let found = state.entries.get(&entry.key).map_or(0, |e| e.revision);
            if let Some(expected) = entry.expected_revision {
                if expected != found {
                    return Err(StorageError::RevisionConflict {
                        key: entry.key.clone(),
                        expected,
                        found,
                    });
                }
            }
        }

        let mut revisions = Vec::with_capacity(batch.entries().len());
        for entry in batch.entries() {
            match &entry.value {
                Some(value) => {
                    let next = state.entries.get(&entry.key).map_or(0, |e| e.revision) + 1;
                    state.entries.insert(
                        entry.key.clone(),
                        CacheEntry {
                            value: value.clone(),
                            revision: next,
                        },
                    );
                    revisions.push((entry.key.clone(), next));
                }
                None => {
                    state.entries.remove(&entry.key);
                    revisions.push((entry.key.clone(), 0));
                }
            }
        }
        Ok(revisions)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()?
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct TenantData {
    activities: Vec<Activity>,
    lessons: HashMap<String, LessonSheet>,
    eyfs: HashMap<String, BTreeMap<LessonNumber, BTreeSet<String>>>,
    half_terms: HashMap<String, Vec<HalfTerm>>,
    units: HashMap<String, Vec<Unit>>,
    plans: BTreeMap<PlanId, LessonPlan>,
    stacks: BTreeMap<StackId, ActivityStack>,
}

/// In-memory remote with the same upsert keys as the hosted tables.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tenants: Mutex<HashMap<TenantId, TenantData>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for both failure switches.
    pub fn set_offline(&self, offline: bool) {
        self.fail_reads.store(offline, Ordering::SeqCst);
        self.fail_writes.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful write calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read<T>(
        &self,
        tenant: &TenantId,
        f: impl FnOnce(&TenantData) -> T,
    ) -> Result<T, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("remote unreachable".into()));
        }
        let tenants = self
            .tenants
            .lock()
            .map_err(|_| StorageError::Unavailable("remote lock poisoned".into()))?;
        let empty = TenantData::default();
        Ok(f(tenants.get(tenant).unwrap_or(&empty)))
    }

    fn write(
        &self,
        tenant: &TenantId,
        f: impl FnOnce(&mut TenantData),
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("remote unreachable".into()));
        }
        let mut tenants = self
            .tenants
            .lock()
            .map_err(|_| StorageError::Unavailable("remote lock poisoned".into()))?;
        f(tenants.entry(tenant.clone()).or_default());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn stack(&self, tenant: &TenantId, id: StackId) -> Option<ActivityStack> {
        self.tenants
            .lock()
            .ok()?
            .get(tenant)?
            .stacks
            .get(&id)
            .cloned()
    }

    pub fn lesson_sheet(&self, tenant: &TenantId, sheet: &str) -> Option<LessonSheet> {
        self.tenants
            .lock()
            .ok()?
            .get(tenant)?
            .lessons
            .get(sheet)
            .cloned()
    }

    pub fn half_terms(&self, tenant: &TenantId, sheet: &str) -> Option<Vec<HalfTerm>> {
        self.tenants
            .lock()
            .ok()?
            .get(tenant)?
            .half_terms
            .get(sheet)
            .cloned()
    }

    pub fn plan(&self, tenant: &TenantId, id: &PlanId) -> Option<LessonPlan> {
        self.tenants.lock().ok()?.get(tenant)?.plans.get(id).cloned()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_activities(&self, tenant: &TenantId) -> Result<Vec<Activity>, StorageError> {
        self.read(tenant, |t| t.activities.clone())
    }

    async fn upsert_activities(
        &self,
        tenant: &TenantId,
        activities: &[Activity],
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            for activity in activities {
                let key = activity_natural_key(activity);
                match t
                    .activities
                    .iter_mut()
                    .find(|a| activity_natural_key(a) == key)
                {
                    Some(existing) => *existing = activity.clone(),
                    None => t.activities.push(activity.clone()),
                }
            }
        })
    }

    async fn delete_activity(
        &self,
        tenant: &TenantId,
        activity: &Activity,
    ) -> Result<(), StorageError> {
        let key = activity_natural_key(activity);
        self.write(tenant, |t| {
            t.activities.retain(|a| activity_natural_key(a) != key);
        })
    }

    async fn fetch_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Option<LessonSheet>, StorageError> {
        self.read(tenant, |t| {
            t.lessons.get(sheet).cloned().map(|mut lessons| {
                if let Some(statements) = t.eyfs.get(sheet) {
                    lessons.lesson_standards = statements.clone();
                }
                lessons
            })
        })
    }

    async fn upsert_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
        lessons: &LessonSheet,
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.lessons.insert(sheet.to_string(), lessons.clone());
        })
    }

    async fn upsert_eyfs_statements(
        &self,
        tenant: &TenantId,
        sheet: &str,
        statements: &BTreeMap<LessonNumber, BTreeSet<String>>,
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.eyfs.insert(sheet.to_string(), statements.clone());
        })
    }

    async fn fetch_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Vec<HalfTerm>, StorageError> {
        self.read(tenant, |t| t.half_terms.get(sheet).cloned().unwrap_or_default())
    }

    async fn upsert_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
        half_terms: &[HalfTerm],
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.half_terms.insert(sheet.to_string(), half_terms.to_vec());
        })
    }

    async fn fetch_units(&self, tenant: &TenantId, collection: &str) -> Result<Vec<Unit>, StorageError> {
        self.read(tenant, |t| t.units.get(collection).cloned().unwrap_or_default())
    }

    async fn upsert_units(
        &self,
        tenant: &TenantId,
        collection: &str,
        units: &[Unit],
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.units.insert(collection.to_string(), units.to_vec());
        })
    }

    async fn fetch_lesson_plans(&self, tenant: &TenantId) -> Result<Vec<LessonPlan>, StorageError> {
        self.read(tenant, |t| t.plans.values().cloned().collect())
    }

    async fn upsert_lesson_plans(
        &self,
        tenant: &TenantId,
        plans: &[LessonPlan],
    ) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            for plan in plans {
                t.plans.insert(plan.id.clone(), plan.clone());
            }
        })
    }

    async fn delete_lesson_plan(&self, tenant: &TenantId, id: &PlanId) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.plans.remove(id);
        })
    }

    async fn fetch_stacks(&self, tenant: &TenantId) -> Result<Vec<ActivityStack>, StorageError> {
        self.read(tenant, |t| t.stacks.values().cloned().collect())
    }

    async fn upsert_stack(&self, tenant: &TenantId, stack: &ActivityStack) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.stacks.insert(stack.id, stack.clone());
        })
    }

    async fn delete_stack(&self, tenant: &TenantId, id: StackId) -> Result<(), StorageError> {
        self.write(tenant, |t| {
            t.stacks.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cloned_caches_share_state_and_detect_conflicts() -> Result<(), StorageError> {
        let mut tab_a = MemoryCache::new();
        let mut tab_b = tab_a.clone();

        let mut batch = WriteBatch::new();
        batch.put("k", json!(1));
        tab_a.apply(&batch)?;

        let mut stale = WriteBatch::new();
        stale.put("k", json!(2));
        stale.entries_mut()[0].expected_revision = Some(0);
        assert!(matches!(
            tab_b.apply(&stale),
            Err(StorageError::RevisionConflict { found: 1, .. })
        ));
        assert_eq!(tab_b.get("k")?.map(|e| e.value), Some(json!(1)));
        Ok(())
    }

    #[test]
    fn failing_cache_rejects_writes() {
        let mut cache = MemoryCache::new();
        cache.set_fail_writes(true);
        let mut batch = WriteBatch::new();
        batch.put("k", json!(1));
        assert!(cache.apply(&batch).is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn activities_upsert_on_natural_key() -> Result<(), StorageError> {
        let remote = MemoryRemote::new();
        let tenant = TenantId::from("teacher-1");
        let mut a = Activity::new("a1", "Hello Song", "Welcome", 5);
        remote.upsert_activities(&tenant, &[a.clone()]).await?;

        a.id = "a1-copy".into();
        a.time = 7;
        remote.upsert_activities(&tenant, &[a.clone()]).await?;
        let stored = remote.fetch_activities(&tenant).await?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].time, 7);

        let other = TenantId::from("teacher-2");
        assert!(remote.fetch_activities(&other).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn offline_remote_fails_both_ways() {
        let remote = MemoryRemote::new();
        let tenant = TenantId::from("teacher-1");
        remote.set_offline(true);
        assert!(remote.fetch_stacks(&tenant).await.is_err());
        let stack = ActivityStack::new("Warm Up", Vec::new(), None, None);
        assert!(remote.upsert_stack(&tenant, &stack).await.is_err());
        assert_eq!(remote.write_count(), 0);
    }
}
