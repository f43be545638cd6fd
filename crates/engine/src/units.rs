use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use lessonsync_core::{CoreError, LessonNumber, Partition, Unit, UnitId};
use lessonsync_storage::{keys, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::{RemoteCtx, SyncGateway};

/// Teaching units per collection, persisted under `units-{collection}`.
pub struct UnitStore {
    gateway: SyncGateway,
    collections: HashMap<String, Vec<Unit>>,
}

pub(crate) async fn push_units(
    ctx: RemoteCtx,
    collection: String,
    units: Vec<Unit>,
) -> Result<(), StorageError> {
    ctx.store.upsert_units(&ctx.tenant, &collection, &units).await
}

impl UnitStore {
    pub fn new(gateway: SyncGateway) -> Self {
        Self {
            gateway,
            collections: HashMap::new(),
        }
    }

    pub async fn load(&mut self, collection: &str) -> Result<(), EngineError> {
        let name = collection.to_string();
        let units: Vec<Unit> = self
            .gateway
            .load(
                &keys::units(collection),
                |ctx| async move { ctx.store.fetch_units(&ctx.tenant, &name).await.map(Some) },
                || Ok(Vec::new()),
            )
            .await?;
        debug!(collection, count = units.len(), "units loaded");
        self.collections.insert(collection.to_string(), units);
        Ok(())
    }

    pub fn is_loaded(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    pub(crate) fn raw(&self, collection: &str) -> Option<&[Unit]> {
        self.collections.get(collection).map(Vec::as_slice)
    }

    /// Units of the collection visible in `partition`'s year.
    pub fn for_partition(&self, partition: &Partition) -> Vec<&Unit> {
        self.collections
            .get(partition.collection())
            .map(|units| {
                units
                    .iter()
                    .filter(|u| partition.admits(u.academic_year.as_deref()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: UnitId) -> Option<&Unit> {
        self.collections.get(collection)?.iter().find(|u| u.id == id)
    }

    /// Inserts or replaces by id.
    pub fn upsert(&mut self, collection: &str, mut unit: Unit) -> Result<Unit, EngineError> {
        if unit.name.trim().is_empty() {
            return Err(CoreError::Validation("unit name is empty".into()).into());
        }
        unit.updated_at = Utc::now();
        let mut next = self.current(collection)?.to_vec();
        match next.iter_mut().find(|u| u.id == unit.id) {
            Some(slot) => *slot = unit.clone(),
            None => next.push(unit.clone()),
        }
        self.commit(collection, next, "units.upsert")?;
        Ok(unit)
    }

    pub fn delete(&mut self, collection: &str, id: UnitId) -> Result<Unit, EngineError> {
        let removed = self
            .get(collection, id)
            .cloned()
            .ok_or_else(|| EngineError::UnitNotFound(id.to_string()))?;
        let next: Vec<Unit> = self
            .current(collection)?
            .iter()
            .filter(|u| u.id != id)
            .cloned()
            .collect();
        self.commit(collection, next, "units.delete")?;
        Ok(removed)
    }

    /// Lessons of a unit that are still present in `existing`.
    pub fn lessons_of(&self, collection: &str, id: UnitId, existing: &[LessonNumber]) -> Vec<LessonNumber> {
        self.get(collection, id)
            .map(|u| {
                u.lesson_numbers
                    .iter()
                    .copied()
                    .filter(|n| existing.contains(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn current(&self, collection: &str) -> Result<&[Unit], EngineError> {
        self.raw(collection)
            .ok_or_else(|| EngineError::PartitionNotLoaded(collection.to_string()))
    }

    fn commit(&mut self, collection: &str, next: Vec<Unit>, operation: &'static str) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put_json(keys::units(collection), &next)?;
        let name = collection.to_string();
        let mirrored = next.clone();
        self.gateway
            .write(operation, batch, move |ctx| push_units(ctx, name, mirrored))?;
        self.collections.insert(collection.to_string(), next);
        Ok(())
    }

    pub(crate) fn install(&mut self, collection: &str, units: Vec<Unit>) {
        self.collections.insert(collection.to_string(), units);
    }
}
