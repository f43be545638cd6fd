use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use lessonsync_core::{LessonNumber, LessonPlan, Partition, PlanId};
use lessonsync_storage::{keys, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::{RemoteCtx, SyncGateway};

/// User-created lesson plans, persisted under `user-created-lesson-plans`.
pub struct PlanStore {
    gateway: SyncGateway,
    plans: BTreeMap<PlanId, LessonPlan>,
}

pub(crate) async fn push_plans(ctx: RemoteCtx, plans: Vec<LessonPlan>) -> Result<(), StorageError> {
    if plans.is_empty() {
        return Ok(());
    }
    ctx.store.upsert_lesson_plans(&ctx.tenant, &plans).await
}

impl PlanStore {
    pub fn new(gateway: SyncGateway) -> Self {
        Self {
            gateway,
            plans: BTreeMap::new(),
        }
    }

    pub async fn load(&mut self) -> Result<(), EngineError> {
        let plans: Vec<LessonPlan> = self
            .gateway
            .load(
                keys::LESSON_PLANS,
                |ctx| async move { ctx.store.fetch_lesson_plans(&ctx.tenant).await.map(Some) },
                || Ok(Vec::new()),
            )
            .await?;
        self.plans = plans.into_iter().map(|p| (p.id.clone(), p)).collect();
        debug!(count = self.plans.len(), "lesson plans loaded");
        Ok(())
    }

    pub fn get(&self, id: &PlanId) -> Option<&LessonPlan> {
        self.plans.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &LessonPlan> {
        self.plans.values()
    }

    /// Plans in `partition` that point at lesson `number`.
    pub fn for_lesson(&self, partition: &Partition, number: LessonNumber) -> Vec<&LessonPlan> {
        self.plans
            .values()
            .filter(|p| p.lesson_number == Some(number) && p.belongs_to(partition))
            .collect()
    }

    pub fn upsert(&mut self, mut plan: LessonPlan) -> Result<LessonPlan, EngineError> {
        plan.validate()?;
        plan.updated_at = Utc::now();
        self.commit(vec![plan.clone()], "plans.upsert")?;
        Ok(plan)
    }

    pub fn delete(&mut self, id: &PlanId) -> Result<LessonPlan, EngineError> {
        let removed = self
            .plans
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::PlanNotFound(id.to_string()))?;
        let mut next = self.plans.clone();
        next.remove(id);
        let mut batch = WriteBatch::new();
        batch.put_json(keys::LESSON_PLANS, &next.values().collect::<Vec<_>>())?;
        let target = id.clone();
        self.gateway.write("plans.delete", batch, move |ctx| async move {
            ctx.store.delete_lesson_plan(&ctx.tenant, &target).await
        })?;
        self.plans = next;
        Ok(removed)
    }

    fn commit(&mut self, changed: Vec<LessonPlan>, operation: &'static str) -> Result<(), EngineError> {
        let next = self.with_changes(&changed);
        let mut batch = WriteBatch::new();
        batch.put_json(keys::LESSON_PLANS, &next.values().collect::<Vec<_>>())?;
        self.gateway
            .write(operation, batch, move |ctx| push_plans(ctx, changed))?;
        self.plans = next;
        Ok(())
    }

    /// The full plan set with `changed` applied, without installing it.
    pub(crate) fn with_changes(&self, changed: &[LessonPlan]) -> BTreeMap<PlanId, LessonPlan> {
        let mut next = self.plans.clone();
        for plan in changed {
            next.insert(plan.id.clone(), plan.clone());
        }
        next
    }

    pub(crate) fn install(&mut self, plans: BTreeMap<PlanId, LessonPlan>) {
        self.plans = plans;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonsync_core::TenantId;
    use lessonsync_storage::MemoryCache;

    async fn store() -> Result<PlanStore, EngineError> {
        let gw = SyncGateway::new(MemoryCache::new(), None, TenantId::new("t"), 8)?;
        let mut store = PlanStore::new(gw);
        store.load().await?;
        Ok(store)
    }

    #[tokio::test]
    async fn upsert_get_delete() -> Result<(), EngineError> {
        let mut store = store().await?;
        store.upsert(LessonPlan::new("p1", "Monday music"))?;
        assert_eq!(store.get(&"p1".into()).map(|p| p.title.as_str()), Some("Monday music"));
        store.delete(&"p1".into())?;
        assert!(store.get(&"p1".into()).is_none());
        assert!(matches!(store.delete(&"p1".into()), Err(EngineError::PlanNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_plan_never_reaches_the_store() -> Result<(), EngineError> {
        let mut store = store().await?;
        assert!(matches!(
            store.upsert(LessonPlan::new("p1", "")),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(store.list().count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn for_lesson_scopes_by_partition() -> Result<(), EngineError> {
        let mut store = store().await?;
        let lkg = Partition::new("LKG", "2024-2025")?;
        let three = LessonNumber::new(3)?;

        let mut mine = LessonPlan::new("p1", "LKG plan");
        mine.lesson_number = Some(three);
        mine.collection = Some("LKG".into());
        let mut other = LessonPlan::new("p2", "UKG plan");
        other.lesson_number = Some(three);
        other.collection = Some("UKG".into());
        store.upsert(mine)?;
        store.upsert(other)?;

        let found: Vec<&str> = store.for_lesson(&lkg, three).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(found, vec!["p1"]);
        Ok(())
    }
}
