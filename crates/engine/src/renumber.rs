//! Delete-and-compact for lesson numbers.
//!
//! Removing lesson `k` shifts every later lesson down so numbers stay dense
//! from 1. Every structure that refers to lessons by number is rewritten in
//! the same step: the lesson sheet itself (including the `lesson_number` of
//! each contained activity and the standards map), half-term lists, lesson
//! plans and unit lesson lists. The new states are computed first, written to
//! the local cache in one batch, and only then installed in memory.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use lessonsync_core::{HalfTerm, LessonNumber, LessonPlan, Partition, Unit};
use lessonsync_storage::{keys, LessonSheet, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::SyncGateway;
use crate::half_terms::{push_half_terms, HalfTermIndex};
use crate::lessons::{push_sheet, LessonStore};
use crate::plans::{push_plans, PlanStore};
use crate::units::{push_units, UnitStore};

/// Old number → new number for every lesson that survived.
pub type NumberMapping = BTreeMap<LessonNumber, LessonNumber>;

/// Remaining lessons, in ascending order, become `1..=N`.
pub fn compute_mapping(current: &[LessonNumber], deleted: LessonNumber) -> NumberMapping {
    let mut remaining: Vec<LessonNumber> = current.iter().copied().filter(|n| *n != deleted).collect();
    remaining.sort();
    remaining.dedup();
    remaining
        .into_iter()
        .zip(std::iter::successors(Some(LessonNumber::FIRST), |n| Some(n.next())))
        .collect()
}

/// Maps a list that only ever holds numbers of the renumbered partition.
/// The deleted number and any number without a surviving lesson are dropped,
/// so a stale entry cannot land on a lesson that moved into its slot.
pub fn remap_list(list: &[LessonNumber], mapping: &NumberMapping) -> Vec<LessonNumber> {
    let mut out = Vec::with_capacity(list.len());
    for n in list.iter().filter_map(|n| mapping.get(n)) {
        if !out.contains(n) {
            out.push(*n);
        }
    }
    out
}

pub fn rewrite_sheet(sheet: &LessonSheet, deleted: LessonNumber, mapping: &NumberMapping) -> LessonSheet {
    let remap = |n: LessonNumber| mapping.get(&n).copied().unwrap_or(n);

    let mut next = LessonSheet::default();
    for (number, lesson) in &sheet.all_lessons_data {
        if *number == deleted {
            continue;
        }
        let new_number = remap(*number);
        let mut lesson = lesson.clone();
        for activity in lesson.activities_mut() {
            activity.lesson_number = Some(new_number);
        }
        next.all_lessons_data.insert(new_number, lesson);
    }
    for (number, standards) in &sheet.lesson_standards {
        if let Some(new_number) = mapping.get(number) {
            next.lesson_standards.insert(*new_number, standards.clone());
        }
    }
    next.reindex();
    next
}

/// `updated_at` only moves when the list actually changed.
fn rewrite_term(term: &HalfTerm, mapping: &NumberMapping) -> HalfTerm {
    let lessons = remap_list(&term.lessons, mapping);
    let mut next = term.clone();
    if lessons != term.lessons {
        next.lessons = lessons;
        next.updated_at = Some(Utc::now());
    }
    next
}

/// A plan pointing at the deleted lesson loses its pointer.
fn rewrite_plan(plan: &LessonPlan, deleted: LessonNumber, mapping: &NumberMapping) -> Option<LessonPlan> {
    let number = plan.lesson_number?;
    let new_number = if number == deleted {
        None
    } else {
        Some(mapping.get(&number).copied().unwrap_or(number))
    };
    if new_number == plan.lesson_number {
        return None;
    }
    let mut plan = plan.clone();
    plan.lesson_number = new_number;
    plan.updated_at = Utc::now();
    Some(plan)
}

fn rewrite_unit(unit: &Unit, mapping: &NumberMapping) -> Unit {
    let lessons = remap_list(&unit.lesson_numbers, mapping);
    let mut next = unit.clone();
    if lessons != unit.lesson_numbers {
        next.lesson_numbers = lessons;
        next.updated_at = Utc::now();
    }
    next
}

/// The stores one renumbering touches.
pub struct RenumberTargets<'a> {
    pub lessons: &'a mut LessonStore,
    pub half_terms: &'a mut HalfTermIndex,
    pub plans: &'a mut PlanStore,
    pub units: &'a mut UnitStore,
}

pub struct RenumberingEngine {
    gateway: SyncGateway,
}

impl RenumberingEngine {
    pub fn new(gateway: SyncGateway) -> Self {
        Self { gateway }
    }

    /// Deletes `deleted` from `partition` and compacts the rest. Deleting a
    /// number that does not exist still compacts. Units are rewritten when
    /// their collection has been loaded.
    pub fn delete_and_renumber(
        &self,
        partition: &Partition,
        deleted: LessonNumber,
        targets: RenumberTargets<'_>,
    ) -> Result<NumberMapping, EngineError> {
        let not_loaded = || EngineError::PartitionNotLoaded(partition.to_string());
        let sheet = targets.lessons.sheet(partition).ok_or_else(not_loaded)?;
        let terms = targets.half_terms.raw_terms(partition).ok_or_else(not_loaded)?;

        let mapping = compute_mapping(&targets.lessons.list_numbers(partition), deleted);
        let existed = targets.lessons.contains(partition, deleted);

        let new_sheet = rewrite_sheet(sheet, deleted, &mapping);
        let new_terms: Vec<HalfTerm> = terms.iter().map(|t| rewrite_term(t, &mapping)).collect();
        let changed_plans: Vec<LessonPlan> = targets
            .plans
            .list()
            .filter(|p| p.belongs_to(partition))
            .filter_map(|p| rewrite_plan(p, deleted, &mapping))
            .collect();
        let new_plans = targets.plans.with_changes(&changed_plans);
        let new_units: Option<Vec<Unit>> = targets.units.raw(partition.collection()).map(|units| {
            units
                .iter()
                .map(|u| {
                    if partition.admits(u.academic_year.as_deref()) {
                        rewrite_unit(u, &mapping)
                    } else {
                        u.clone()
                    }
                })
                .collect()
        });

        let mut batch = WriteBatch::new();
        batch.put_json(keys::lessons(partition), &new_sheet)?;
        batch.put_json(keys::half_terms(partition), &new_terms)?;
        if !changed_plans.is_empty() {
            batch.put_json(keys::LESSON_PLANS, &new_plans.values().collect::<Vec<_>>())?;
        }
        if let Some(units) = &new_units {
            batch.put_json(keys::units(partition.collection()), units)?;
        }

        let sheet_name = partition.sheet_key();
        let collection = partition.collection().to_string();
        let (remote_sheet, remote_terms, remote_units) =
            (new_sheet.clone(), new_terms.clone(), new_units.clone());
        let plan_count = changed_plans.len();
        let remote_plans = changed_plans;
        self.gateway.write("lessons.renumber", batch, move |ctx| async move {
            push_sheet(ctx.clone(), sheet_name.clone(), remote_sheet).await?;
            push_half_terms(ctx.clone(), sheet_name, remote_terms).await?;
            push_plans(ctx.clone(), remote_plans).await?;
            if let Some(units) = remote_units {
                push_units(ctx, collection, units).await?;
            }
            Ok::<(), StorageError>(())
        })?;

        targets.lessons.install(partition, new_sheet);
        targets.half_terms.install(partition, new_terms);
        targets.plans.install(new_plans);
        if let Some(units) = new_units {
            targets.units.install(partition.collection(), units);
        }

        info!(
            %partition,
            %deleted,
            existed,
            remaining = mapping.len(),
            plans_rewritten = plan_count,
            "lesson deleted and renumbered"
        );
        Ok(mapping)
    }
}
