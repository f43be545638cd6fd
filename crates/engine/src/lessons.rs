//! Per-partition lesson sheets keyed by lesson number.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use lessonsync_core::{
    Activity, ActivityId, CoreError, LessonData, LessonDraft, LessonNumber, Partition,
};
use lessonsync_storage::{keys, LessonSheet, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::{RemoteCtx, SyncGateway};

pub struct LessonStore {
    gateway: SyncGateway,
    sheets: HashMap<Partition, LessonSheet>,
}

/// Remote leg for one sheet: the lessons row, then its EYFS statements row.
pub(crate) async fn push_sheet(
    ctx: RemoteCtx,
    sheet_name: String,
    sheet: LessonSheet,
) -> Result<(), StorageError> {
    ctx.store.upsert_lessons(&ctx.tenant, &sheet_name, &sheet).await?;
    ctx.store
        .upsert_eyfs_statements(&ctx.tenant, &sheet_name, &sheet.lesson_standards)
        .await
}

fn not_found(partition: &Partition, number: LessonNumber) -> EngineError {
    EngineError::LessonNotFound(format!("{partition} #{number}"))
}

impl LessonStore {
    pub fn new(gateway: SyncGateway) -> Self {
        Self {
            gateway,
            sheets: HashMap::new(),
        }
    }

    /// Loads one partition. When neither the remote nor the year-scoped
    /// local key has data, the legacy year-unaware blob is adopted.
    pub async fn load(&mut self, partition: &Partition) -> Result<(), EngineError> {
        let key = keys::lessons(partition);
        let legacy_key = keys::legacy_lessons(partition.collection());
        let sheet_name = partition.sheet_key();
        let gateway = self.gateway.clone();

        let mut sheet: LessonSheet = self
            .gateway
            .load(
                &key,
                |ctx| async move { ctx.store.fetch_lessons(&ctx.tenant, &sheet_name).await },
                || {
                    let mut legacy: LessonSheet = gateway.read_local(&legacy_key)?.unwrap_or_default();
                    if !legacy.is_empty() {
                        info!(%partition, key = %legacy_key, "adopting legacy lesson data");
                    }
                    legacy.retain_partition(partition);
                    Ok(legacy)
                },
            )
            .await?;

        let before = sheet.all_lessons_data.len();
        sheet.retain_partition(partition);
        let dropped = before - sheet.all_lessons_data.len();
        if dropped > 0 {
            warn!(%partition, dropped, "ignoring lessons tagged with another academic year");
        }
        info!(%partition, lessons = sheet.all_lessons_data.len(), "lessons loaded");
        self.sheets.insert(partition.clone(), sheet);
        Ok(())
    }

    pub fn is_loaded(&self, partition: &Partition) -> bool {
        self.sheets.contains_key(partition)
    }

    pub fn sheet(&self, partition: &Partition) -> Option<&LessonSheet> {
        self.sheets.get(partition)
    }

    pub fn get(&self, partition: &Partition, number: LessonNumber) -> Option<&LessonData> {
        self.sheets
            .get(partition)?
            .all_lessons_data
            .get(&number)
            .filter(|l| partition.admits(l.academic_year.as_deref()))
    }

    pub fn contains(&self, partition: &Partition, number: LessonNumber) -> bool {
        self.get(partition, number).is_some()
    }

    /// Ascending numeric order.
    pub fn list_numbers(&self, partition: &Partition) -> Vec<LessonNumber> {
        self.sheets
            .get(partition)
            .map(|s| {
                s.all_lessons_data
                    .iter()
                    .filter(|(_, l)| partition.admits(l.academic_year.as_deref()))
                    .map(|(n, _)| *n)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn next_number(&self, partition: &Partition) -> LessonNumber {
        self.list_numbers(partition)
            .last()
            .map_or(LessonNumber::FIRST, |n| n.next())
    }

    pub fn standards(&self, partition: &Partition, number: LessonNumber) -> BTreeSet<String> {
        self.sheets
            .get(partition)
            .and_then(|s| s.lesson_standards.get(&number))
            .cloned()
            .or_else(|| self.get(partition, number).map(|l| l.standards.clone()))
            .unwrap_or_default()
    }

    /// Distinct categories in use, in display order.
    pub fn teaching_units(&self, partition: &Partition) -> &[String] {
        self.sheets
            .get(partition)
            .map(|s| s.teaching_units.as_slice())
            .unwrap_or(&[])
    }

    /// Applies `f` to a copy of the partition's sheet and reindexes it.
    /// Nothing is committed or installed.
    pub(crate) fn stage<T>(
        &self,
        partition: &Partition,
        f: impl FnOnce(&mut LessonSheet) -> Result<T, EngineError>,
    ) -> Result<(T, LessonSheet), EngineError> {
        let mut next = self
            .sheets
            .get(partition)
            .cloned()
            .ok_or_else(|| EngineError::PartitionNotLoaded(partition.to_string()))?;
        let out = f(&mut next)?;
        next.reindex();
        Ok((out, next))
    }

    /// Read-modify-write of one partition. `f` works on a copy; the result is
    /// reindexed, committed locally and only then installed.
    pub fn update_partition<T>(
        &mut self,
        partition: &Partition,
        operation: &'static str,
        f: impl FnOnce(&mut LessonSheet) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let (out, next) = self.stage(partition, f)?;
        self.commit(partition, operation, next)?;
        Ok(out)
    }

    fn commit(&mut self, partition: &Partition, operation: &'static str, next: LessonSheet) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put_json(keys::lessons(partition), &next)?;
        let sheet_name = partition.sheet_key();
        let mirrored = next.clone();
        self.gateway.write(operation, batch, move |ctx| {
            push_sheet(ctx, sheet_name, mirrored)
        })?;
        self.sheets.insert(partition.clone(), next);
        Ok(())
    }

    /// Replaces a lesson with `draft`, recomputing its derived fields. Every
    /// activity is stamped with `number`.
    pub fn upsert(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        draft: LessonDraft,
    ) -> Result<LessonData, EngineError> {
        let (lesson, next) = self.stage_upsert(partition, number, draft)?;
        self.commit(partition, "lessons.upsert", next)?;
        debug!(%partition, %number, total_time = lesson.total_time, "lesson saved");
        Ok(lesson)
    }

    /// The validated lesson and the sheet that would hold it.
    pub(crate) fn stage_upsert(
        &self,
        partition: &Partition,
        number: LessonNumber,
        mut draft: LessonDraft,
    ) -> Result<(LessonData, LessonSheet), EngineError> {
        if !partition.admits(draft.academic_year.as_deref()) {
            return Err(CoreError::Validation(format!(
                "lesson for {} cannot be stored in {partition}",
                draft.academic_year.as_deref().unwrap_or_default()
            ))
            .into());
        }
        for activity in draft.grouped.values_mut().flatten() {
            activity.validate()?;
            activity.lesson_number = Some(number);
        }

        let lesson = LessonData::from_draft(draft);
        let stored = lesson.clone();
        let ((), next) = self.stage(partition, move |sheet| {
            if !stored.standards.is_empty() {
                sheet.lesson_standards.insert(number, stored.standards.clone());
            }
            sheet.all_lessons_data.insert(number, stored);
            Ok(())
        })?;
        Ok((lesson, next))
    }

    /// Removes one lesson without touching any other number. Lesson deletion
    /// from the outside goes through renumbering instead.
    pub fn delete(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
    ) -> Result<Option<LessonData>, EngineError> {
        if !self.contains(partition, number) {
            return Ok(None);
        }
        self.update_partition(partition, "lessons.delete", |sheet| {
            sheet.lesson_standards.remove(&number);
            Ok(sheet.all_lessons_data.remove(&number))
        })
    }

    /// Draft of the lesson at `number`, or an empty one tagged with the
    /// partition's year.
    pub(crate) fn draft_for(&self, partition: &Partition, number: LessonNumber) -> LessonDraft {
        match self.get(partition, number) {
            Some(lesson) => lesson.to_draft(),
            None => LessonDraft {
                academic_year: Some(partition.academic_year().to_string()),
                ..LessonDraft::new()
            },
        }
    }

    /// Appends `activity` to the lesson, creating the lesson when absent.
    pub fn add_activity(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        activity: Activity,
    ) -> Result<LessonData, EngineError> {
        let mut draft = self.draft_for(partition, number);
        draft.push(activity);
        self.upsert(partition, number, draft)
    }

    pub fn remove_activity(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        activity_id: &ActivityId,
    ) -> Result<LessonData, EngineError> {
        let mut draft = self
            .get(partition, number)
            .ok_or_else(|| not_found(partition, number))?
            .to_draft();
        for activities in draft.grouped.values_mut() {
            activities.retain(|a| &a.id != activity_id);
        }
        self.upsert(partition, number, draft)
    }

    /// `None` or a blank title switches back to a synthesized one.
    pub fn set_title(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        title: Option<String>,
    ) -> Result<LessonData, EngineError> {
        let mut draft = self
            .get(partition, number)
            .ok_or_else(|| not_found(partition, number))?
            .to_draft();
        draft.title = title;
        self.upsert(partition, number, draft)
    }

    pub fn set_standards(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        standards: BTreeSet<String>,
    ) -> Result<(), EngineError> {
        if !self.contains(partition, number) {
            return Err(not_found(partition, number));
        }
        self.update_partition(partition, "lessons.set_standards", |sheet| {
            if let Some(lesson) = sheet.all_lessons_data.get_mut(&number) {
                lesson.standards = standards.clone();
            }
            if standards.is_empty() {
                sheet.lesson_standards.remove(&number);
            } else {
                sheet.lesson_standards.insert(number, standards);
            }
            Ok(())
        })
    }

    /// Swaps in a sheet that has already been committed.
    pub(crate) fn install(&mut self, partition: &Partition, sheet: LessonSheet) {
        self.sheets.insert(partition.clone(), sheet);
    }
}
