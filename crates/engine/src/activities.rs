use std::future::Future;

use tracing::debug;

use lessonsync_core::{Activity, ActivityId};
use lessonsync_storage::{keys, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::{RemoteCtx, SyncGateway};

/// The tenant's activity library: reusable templates that lessons and
/// stacks copy from.
pub struct ActivityStore {
    gateway: SyncGateway,
    activities: Vec<Activity>,
}

impl ActivityStore {
    pub fn new(gateway: SyncGateway) -> Self {
        Self {
            gateway,
            activities: Vec::new(),
        }
    }

    pub async fn load(&mut self) -> Result<(), EngineError> {
        self.activities = self
            .gateway
            .load(
                keys::LIBRARY_ACTIVITIES,
                |ctx| async move { ctx.store.fetch_activities(&ctx.tenant).await.map(Some) },
                || Ok(Vec::new()),
            )
            .await?;
        debug!(count = self.activities.len(), "activity library loaded");
        Ok(())
    }

    pub fn get(&self, id: &ActivityId) -> Option<&Activity> {
        self.activities.iter().find(|a| &a.id == id)
    }

    pub fn list(&self) -> &[Activity] {
        &self.activities
    }

    pub fn by_category(&self, category: &str) -> Vec<&Activity> {
        self.activities
            .iter()
            .filter(|a| a.category == category)
            .collect()
    }

    pub fn upsert(&mut self, activity: Activity) -> Result<(), EngineError> {
        self.upsert_many(vec![activity])
    }

    /// Inserts or replaces by id.
    pub fn upsert_many(&mut self, incoming: Vec<Activity>) -> Result<(), EngineError> {
        let mut next = self.activities.clone();
        let mut changed = Vec::with_capacity(incoming.len());
        for activity in incoming {
            activity.validate()?;
            let activity = Activity {
                resources: activity.resources.normalized(),
                ..activity
            };
            match next.iter_mut().find(|a| a.id == activity.id) {
                Some(slot) => *slot = activity.clone(),
                None => next.push(activity.clone()),
            }
            changed.push(activity);
        }
        self.commit(next, "activities.upsert", |ctx| async move {
            ctx.store.upsert_activities(&ctx.tenant, &changed).await
        })
    }

    pub fn delete(&mut self, id: &ActivityId) -> Result<Activity, EngineError> {
        let removed = self
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ActivityNotFound(id.to_string()))?;
        let next: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| &a.id != id)
            .cloned()
            .collect();
        let target = removed.clone();
        self.commit(next, "activities.delete", |ctx| async move {
            ctx.store.delete_activity(&ctx.tenant, &target).await
        })?;
        Ok(removed)
    }

    fn commit<F, Fut>(&mut self, next: Vec<Activity>, operation: &'static str, remote: F) -> Result<(), EngineError>
    where
        F: FnOnce(RemoteCtx) -> Fut,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let mut batch = WriteBatch::new();
        batch.put_json(keys::LIBRARY_ACTIVITIES, &next)?;
        self.gateway.write(operation, batch, remote)?;
        self.activities = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonsync_core::TenantId;
    use lessonsync_storage::MemoryCache;

    fn store() -> ActivityStore {
        let gw = SyncGateway::new(MemoryCache::new(), None, TenantId::new("t"), 8).unwrap();
        ActivityStore::new(gw)
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() -> Result<(), EngineError> {
        let mut store = store();
        store.load().await?;
        store.upsert(Activity::new("a1", "Hello Song", "Welcome", 5))?;
        store.upsert(Activity::new("a1", "Hello Song", "Welcome", 7))?;
        store.upsert(Activity::new("a2", "Bye Song", "Goodbye", 3))?;
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.get(&"a1".into()).map(|a| a.time), Some(7));
        assert_eq!(store.by_category("Goodbye").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_activity_is_rejected() -> Result<(), EngineError> {
        let mut store = store();
        store.load().await?;
        let err = store.upsert(Activity::new("a1", " ", "Welcome", 5)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.list().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() -> Result<(), EngineError> {
        let mut store = store();
        store.load().await?;
        store.upsert(Activity::new("a1", "Hello Song", "Welcome", 5))?;
        assert!(matches!(
            store.delete(&"zz".into()),
            Err(EngineError::ActivityNotFound(_))
        ));
        assert_eq!(store.delete(&"a1".into())?.name, "Hello Song");
        assert!(store.list().is_empty());
        Ok(())
    }
}
