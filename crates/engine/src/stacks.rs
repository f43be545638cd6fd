use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, info};

use lessonsync_core::{Activity, ActivityId, ActivityStack, CoreError, StackId};
use lessonsync_storage::{keys, WriteBatch};

use crate::error::EngineError;
use crate::gateway::SyncGateway;

/// Partial update for [`ActivityStackStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct StackPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub activities: Option<Vec<Activity>>,
}

/// Named bundles of activity copies, persisted under `activity-stacks`.
pub struct ActivityStackStore {
    gateway: SyncGateway,
    stacks: BTreeMap<StackId, ActivityStack>,
}

fn validate_stack(name: &str, activities: &[Activity]) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation("stack name is empty".into()));
    }
    for activity in activities {
        activity.validate()?;
    }
    Ok(())
}

impl ActivityStackStore {
    pub fn new(gateway: SyncGateway) -> Self {
        Self {
            gateway,
            stacks: BTreeMap::new(),
        }
    }

    pub async fn load(&mut self) -> Result<(), EngineError> {
        let stacks: Vec<ActivityStack> = self
            .gateway
            .load(
                keys::ACTIVITY_STACKS,
                |ctx| async move { ctx.store.fetch_stacks(&ctx.tenant).await.map(Some) },
                || Ok(Vec::new()),
            )
            .await?;
        self.stacks = stacks.into_iter().map(|s| (s.id, s)).collect();
        debug!(count = self.stacks.len(), "activity stacks loaded");
        Ok(())
    }

    pub fn get(&self, id: StackId) -> Option<&ActivityStack> {
        self.stacks.get(&id)
    }

    pub fn contains(&self, id: StackId) -> bool {
        self.stacks.contains_key(&id)
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<&ActivityStack> {
        let mut stacks: Vec<&ActivityStack> = self.stacks.values().collect();
        stacks.sort_by_key(|s| s.created_at);
        stacks
    }

    pub fn create(
        &mut self,
        name: impl Into<String>,
        activities: Vec<Activity>,
        description: Option<String>,
        category: Option<String>,
    ) -> Result<ActivityStack, EngineError> {
        let name = name.into();
        validate_stack(&name, &activities)?;
        let stack = ActivityStack::new(name, activities, description, category);
        self.save(stack.clone(), "stacks.create")?;
        info!(stack = %stack.id, name = %stack.name, total_time = stack.total_time, "stack created");
        Ok(stack)
    }

    pub fn update(&mut self, id: StackId, patch: StackPatch) -> Result<ActivityStack, EngineError> {
        self.modify(id, "stacks.update", |stack| {
            if let Some(name) = patch.name {
                stack.name = name;
            }
            if let Some(description) = patch.description {
                stack.description = description;
            }
            if let Some(category) = patch.category {
                stack.category = category;
            }
            if let Some(activities) = patch.activities {
                stack.activities = activities;
            }
        })
    }

    pub fn add_activities(
        &mut self,
        id: StackId,
        activities: Vec<Activity>,
    ) -> Result<ActivityStack, EngineError> {
        self.modify(id, "stacks.add_activities", |stack| {
            if stack.category.is_none() {
                stack.category = activities.first().map(|a| a.category.clone());
            }
            stack.activities.extend(activities);
        })
    }

    /// Removing an activity the stack does not hold is a no-op.
    pub fn remove_activity(
        &mut self,
        id: StackId,
        activity_id: &ActivityId,
    ) -> Result<ActivityStack, EngineError> {
        self.modify(id, "stacks.remove_activity", |stack| {
            stack.activities.retain(|a| &a.id != activity_id);
        })
    }

    /// Half-terms that still list the stack filter it out on read.
    pub fn delete(&mut self, id: StackId) -> Result<ActivityStack, EngineError> {
        let removed = self
            .stacks
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::StackNotFound(id.to_string()))?;
        let mut next = self.stacks.clone();
        next.remove(&id);
        let mut batch = WriteBatch::new();
        batch.put_json(keys::ACTIVITY_STACKS, &next.values().collect::<Vec<_>>())?;
        self.gateway.write("stacks.delete", batch, move |ctx| async move {
            ctx.store.delete_stack(&ctx.tenant, id).await
        })?;
        self.stacks = next;
        info!(stack = %id, "stack deleted");
        Ok(removed)
    }

    /// Deletes the stack and hands its activities back to the caller.
    pub fn unstack(&mut self, id: StackId) -> Result<Vec<Activity>, EngineError> {
        Ok(self.delete(id)?.activities)
    }

    fn modify(
        &mut self,
        id: StackId,
        operation: &'static str,
        f: impl FnOnce(&mut ActivityStack),
    ) -> Result<ActivityStack, EngineError> {
        let mut stack = self
            .stacks
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::StackNotFound(id.to_string()))?;
        f(&mut stack);
        validate_stack(&stack.name, &stack.activities)?;
        stack.recompute();
        stack.updated_at = Utc::now();
        self.save(stack.clone(), operation)?;
        Ok(stack)
    }

    fn save(&mut self, stack: ActivityStack, operation: &'static str) -> Result<(), EngineError> {
        let mut next = self.stacks.clone();
        next.insert(stack.id, stack.clone());
        let mut batch = WriteBatch::new();
        batch.put_json(keys::ACTIVITY_STACKS, &next.values().collect::<Vec<_>>())?;
        self.gateway.write(operation, batch, move |ctx| async move {
            ctx.store.upsert_stack(&ctx.tenant, &stack).await
        })?;
        self.stacks = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonsync_core::TenantId;
    use lessonsync_storage::MemoryCache;

    async fn store() -> Result<ActivityStackStore, EngineError> {
        let gw = SyncGateway::new(MemoryCache::new(), None, TenantId::new("t"), 8)?;
        let mut store = ActivityStackStore::new(gw);
        store.load().await?;
        Ok(store)
    }

    fn warm_up() -> Vec<Activity> {
        vec![
            Activity::new("a1", "Stretch", "Movement", 5),
            Activity::new("a2", "Clap", "Rhythm", 3),
        ]
    }

    #[tokio::test]
    async fn create_derives_time_and_category() -> Result<(), EngineError> {
        let mut store = store().await?;
        let stack = store.create("Warm Up", warm_up(), None, None)?;
        assert_eq!(stack.total_time, 8);
        assert_eq!(stack.category.as_deref(), Some("Movement"));
        assert!(store.contains(stack.id));
        Ok(())
    }

    #[tokio::test]
    async fn mutations_recompute_total_time() -> Result<(), EngineError> {
        let mut store = store().await?;
        let id = store.create("Warm Up", warm_up(), None, None)?.id;

        let stack = store.add_activities(id, vec![Activity::new("a3", "Jump", "Movement", 4)])?;
        assert_eq!(stack.total_time, 12);

        let stack = store.remove_activity(id, &"a1".into())?;
        assert_eq!(stack.total_time, 7);

        let stack = store.update(
            id,
            StackPatch {
                name: Some("Cool Down".into()),
                activities: Some(vec![Activity::new("a9", "Breathe", "Calm", 2)]),
                ..StackPatch::default()
            },
        )?;
        assert_eq!((stack.name.as_str(), stack.total_time), ("Cool Down", 2));
        Ok(())
    }

    #[tokio::test]
    async fn stack_copies_are_independent_of_their_source() -> Result<(), EngineError> {
        let mut store = store().await?;
        let mut source = warm_up();
        let id = store.create("Warm Up", source.clone(), None, None)?.id;
        source[0].time = 60;
        assert_eq!(store.get(id).map(|s| s.total_time), Some(8));
        Ok(())
    }

    #[tokio::test]
    async fn unstack_removes_and_returns_activities() -> Result<(), EngineError> {
        let mut store = store().await?;
        let id = store.create("Warm Up", warm_up(), None, None)?.id;
        let activities = store.unstack(id)?;
        assert_eq!(activities.len(), 2);
        assert!(!store.contains(id));
        assert!(matches!(store.unstack(id), Err(EngineError::StackNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn empty_name_is_rejected() -> Result<(), EngineError> {
        let mut store = store().await?;
        assert!(matches!(
            store.create("  ", warm_up(), None, None),
            Err(EngineError::Validation(_))
        ));
        assert!(store.list().is_empty());
        Ok(())
    }
}
