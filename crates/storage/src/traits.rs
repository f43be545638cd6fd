use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use lessonsync_core::{
    Activity, ActivityStack, HalfTerm, LessonNumber, LessonPlan, PlanId, StackId, TenantId, Unit,
};

use crate::error::StorageError;
use crate::records::LessonSheet;

/// A stored value and the revision it was written at. Revisions start at 1;
/// 0 means "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub key: String,
    /// `None` deletes the key.
    pub value: Option<Value>,
    /// When set, the write only succeeds if the key is currently at this
    /// revision.
    pub expected_revision: Option<u64>,
}

/// Keys written together: either every entry lands or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    entries: Vec<BatchEntry>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.entries.push(BatchEntry {
            key: key.into(),
            value: Some(value),
            expected_revision: None,
        });
        self
    }

    pub fn put_json<T: serde::Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, StorageError> {
        let value = serde_json::to_value(value)?;
        Ok(self.put(key, value))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.entries.push(BatchEntry {
            key: key.into(),
            value: None,
            expected_revision: None,
        });
        self
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [BatchEntry] {
        &mut self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Synchronous, durable key-value cache. The offline source of truth.
pub trait LocalCache: Send {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Applies every entry atomically. Returns the new revision of each key,
    /// in batch order (0 for deleted keys).
    fn apply(&mut self, batch: &WriteBatch) -> Result<Vec<(String, u64)>, StorageError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Tenant-scoped remote mirror. Every call is best effort from the caller's
/// point of view; implementations just report what happened.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_activities(&self, tenant: &TenantId) -> Result<Vec<Activity>, StorageError>;

    /// Upsert on the natural key `(activity, category, lesson_number)`.
    async fn upsert_activities(
        &self,
        tenant: &TenantId,
        activities: &[Activity],
    ) -> Result<(), StorageError>;

    async fn delete_activity(
        &self,
        tenant: &TenantId,
        activity: &Activity,
    ) -> Result<(), StorageError>;

    /// Lessons row for one sheet, with the `eyfs_statements` row merged into
    /// `lesson_standards`.
    async fn fetch_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Option<LessonSheet>, StorageError>;

    async fn upsert_lessons(
        &self,
        tenant: &TenantId,
        sheet: &str,
        lessons: &LessonSheet,
    ) -> Result<(), StorageError>;

    async fn upsert_eyfs_statements(
        &self,
        tenant: &TenantId,
        sheet: &str,
        statements: &BTreeMap<LessonNumber, BTreeSet<String>>,
    ) -> Result<(), StorageError>;

    async fn fetch_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
    ) -> Result<Vec<HalfTerm>, StorageError>;

    async fn upsert_half_terms(
        &self,
        tenant: &TenantId,
        sheet: &str,
        half_terms: &[HalfTerm],
    ) -> Result<(), StorageError>;

    async fn fetch_units(&self, tenant: &TenantId, collection: &str) -> Result<Vec<Unit>, StorageError>;

    async fn upsert_units(
        &self,
        tenant: &TenantId,
        collection: &str,
        units: &[Unit],
    ) -> Result<(), StorageError>;

    async fn fetch_lesson_plans(&self, tenant: &TenantId) -> Result<Vec<LessonPlan>, StorageError>;

    async fn upsert_lesson_plans(
        &self,
        tenant: &TenantId,
        plans: &[LessonPlan],
    ) -> Result<(), StorageError>;

    async fn delete_lesson_plan(&self, tenant: &TenantId, id: &PlanId) -> Result<(), StorageError>;

    async fn fetch_stacks(&self, tenant: &TenantId) -> Result<Vec<ActivityStack>, StorageError>;

    async fn upsert_stack(&self, tenant: &TenantId, stack: &ActivityStack) -> Result<(), StorageError>;

    async fn delete_stack(&self, tenant: &TenantId, id: StackId) -> Result<(), StorageError>;
}

/// Natural key of a remote activity row.
pub fn activity_natural_key(activity: &Activity) -> (String, String, Option<LessonNumber>) {
    (
        activity.name.clone(),
        activity.category.clone(),
        activity.lesson_number,
    )
}
