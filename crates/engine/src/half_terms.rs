//! Six fixed buckets per partition, each listing lesson numbers and stacks.
//!
//! Stored lists may go stale when lessons or stacks disappear. Reads filter
//! them against the owning stores and never write the filtered result back.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use lessonsync_core::{
    half_term::normalize_half_terms, HalfTerm, HalfTermId, LessonNumber, Partition, StackId,
    TermHint,
};
use lessonsync_storage::{keys, StorageError, WriteBatch};

use crate::error::EngineError;
use crate::gateway::{RemoteCtx, SyncGateway};
use crate::lessons::LessonStore;
use crate::stacks::ActivityStackStore;

pub struct HalfTermIndex {
    gateway: SyncGateway,
    capacity: usize,
    partitions: HashMap<Partition, Vec<HalfTerm>>,
}

fn dedup(numbers: Vec<LessonNumber>) -> Vec<LessonNumber> {
    let mut out = Vec::with_capacity(numbers.len());
    for n in numbers {
        if !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

pub(crate) async fn push_half_terms(
    ctx: RemoteCtx,
    sheet_name: String,
    terms: Vec<HalfTerm>,
) -> Result<(), StorageError> {
    ctx.store.upsert_half_terms(&ctx.tenant, &sheet_name, &terms).await
}

impl HalfTermIndex {
    pub fn new(gateway: SyncGateway, capacity: usize) -> Self {
        Self {
            gateway,
            capacity,
            partitions: HashMap::new(),
        }
    }

    /// First load of a partition creates its six empty buckets.
    pub async fn load(&mut self, partition: &Partition) -> Result<(), EngineError> {
        let sheet_name = partition.sheet_key();
        let stored: Vec<HalfTerm> = self
            .gateway
            .load(
                &keys::half_terms(partition),
                |ctx| async move {
                    ctx.store
                        .fetch_half_terms(&ctx.tenant, &sheet_name)
                        .await
                        .map(Some)
                },
                || Ok(HalfTerm::defaults()),
            )
            .await?;
        let terms = normalize_half_terms(stored.clone());
        if terms != stored {
            debug!(%partition, stored = stored.len(), "writing back normalized half-terms");
            self.commit(partition, "half_terms.normalize", terms.clone())?;
        }
        info!(
            %partition,
            assigned = terms.iter().map(|t| t.lessons.len()).sum::<usize>(),
            "half-terms loaded"
        );
        self.partitions.insert(partition.clone(), terms);
        Ok(())
    }

    pub fn is_loaded(&self, partition: &Partition) -> bool {
        self.partitions.contains_key(partition)
    }

    /// Stored bucket, unfiltered.
    pub fn term(&self, partition: &Partition, id: HalfTermId) -> Option<&HalfTerm> {
        self.partitions.get(partition)?.iter().find(|t| t.id == id)
    }

    pub(crate) fn raw_terms(&self, partition: &Partition) -> Option<&[HalfTerm]> {
        self.partitions.get(partition).map(Vec::as_slice)
    }

    /// Lesson numbers of one bucket that still exist in `lessons`.
    pub fn get(&self, partition: &Partition, id: HalfTermId, lessons: &LessonStore) -> Vec<LessonNumber> {
        let Some(term) = self.term(partition, id) else {
            return Vec::new();
        };
        let (live, stale): (Vec<LessonNumber>, Vec<LessonNumber>) = term
            .lessons
            .iter()
            .copied()
            .partition(|n| lessons.contains(partition, *n));
        if !stale.is_empty() {
            debug!(%partition, half_term = %id, ?stale, "skipping lessons that no longer exist");
        }
        live
    }

    /// Stack ids of one bucket that still exist in `stacks`.
    pub fn stacks(&self, partition: &Partition, id: HalfTermId, stacks: &ActivityStackStore) -> Vec<StackId> {
        let Some(term) = self.term(partition, id) else {
            return Vec::new();
        };
        term.stacks
            .iter()
            .copied()
            .filter(|s| {
                let live = stacks.contains(*s);
                if !live {
                    debug!(%partition, half_term = %id, stack = %s, "skipping deleted stack");
                }
                live
            })
            .collect()
    }

    /// All six buckets with both lists filtered.
    pub fn terms(
        &self,
        partition: &Partition,
        lessons: &LessonStore,
        stacks: &ActivityStackStore,
    ) -> Vec<HalfTerm> {
        HalfTermId::ALL
            .into_iter()
            .filter_map(|id| {
                let mut term = self.term(partition, id)?.clone();
                term.lessons = self.get(partition, id, lessons);
                term.stacks = self.stacks(partition, id, stacks);
                Some(term)
            })
            .collect()
    }

    /// The bucket holding `number`, if any.
    pub fn locate(&self, partition: &Partition, number: LessonNumber) -> Option<HalfTermId> {
        self.partitions
            .get(partition)?
            .iter()
            .find(|t| t.contains(number))
            .map(|t| t.id)
    }

    /// Replaces a bucket's lesson list. `stacks` of `None` keeps the current
    /// stack list. Always bumps `updated_at`.
    pub fn assign(
        &mut self,
        partition: &Partition,
        id: HalfTermId,
        lessons: Vec<LessonNumber>,
        is_complete: bool,
        stacks: Option<Vec<StackId>>,
    ) -> Result<(), EngineError> {
        self.update_partition(partition, "half_terms.assign", id, |term| {
            term.lessons = dedup(lessons);
            term.is_complete = is_complete;
            if let Some(stacks) = stacks {
                term.stacks = stacks;
            }
        })
    }

    /// Places a lesson that is not in any bucket yet. A hint picks the first
    /// half of that term; otherwise the first bucket below capacity wins,
    /// falling back to Autumn 1.
    pub fn auto_assign(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        hint: Option<TermHint>,
    ) -> Result<Option<HalfTermId>, EngineError> {
        let Some((target, next)) = self.stage_auto_assign(partition, number, hint)? else {
            return Ok(None);
        };
        self.commit(partition, "half_terms.auto_assign", next)?;
        debug!(%partition, %number, half_term = %target, "lesson auto-assigned");
        Ok(Some(target))
    }

    /// The bucket `number` would be placed in and the resulting lists, or
    /// `None` when it already sits in a bucket. Nothing is committed.
    pub(crate) fn stage_auto_assign(
        &self,
        partition: &Partition,
        number: LessonNumber,
        hint: Option<TermHint>,
    ) -> Result<Option<(HalfTermId, Vec<HalfTerm>)>, EngineError> {
        let terms = self
            .partitions
            .get(partition)
            .ok_or_else(|| EngineError::PartitionNotLoaded(partition.to_string()))?;
        if terms.iter().any(|t| t.contains(number)) {
            return Ok(None);
        }
        let target = match hint {
            Some(hint) => hint.first_half(),
            None => terms
                .iter()
                .find(|t| t.lessons.len() < self.capacity)
                .map_or(HalfTermId::A1, |t| t.id),
        };
        let next = self.stage(partition, target, |term| {
            term.lessons.push(number);
        })?;
        Ok(Some((target, next)))
    }

    /// Drops a number from whichever bucket holds it, without renumbering.
    pub fn remove_lesson(&mut self, partition: &Partition, number: LessonNumber) -> Result<bool, EngineError> {
        let Some(id) = self.locate(partition, number) else {
            return Ok(false);
        };
        self.update_partition(partition, "half_terms.remove_lesson", id, |term| {
            term.lessons.retain(|n| *n != number);
        })?;
        Ok(true)
    }

    pub fn attach_stack(&mut self, partition: &Partition, id: HalfTermId, stack: StackId) -> Result<(), EngineError> {
        self.update_partition(partition, "half_terms.attach_stack", id, |term| {
            if !term.stacks.contains(&stack) {
                term.stacks.push(stack);
            }
        })
    }

    pub fn detach_stack(&mut self, partition: &Partition, id: HalfTermId, stack: StackId) -> Result<(), EngineError> {
        self.update_partition(partition, "half_terms.detach_stack", id, |term| {
            term.stacks.retain(|s| *s != stack);
        })
    }

    pub fn set_complete(&mut self, partition: &Partition, id: HalfTermId, complete: bool) -> Result<(), EngineError> {
        self.update_partition(partition, "half_terms.set_complete", id, |term| {
            term.is_complete = complete;
        })
    }

    fn stage(
        &self,
        partition: &Partition,
        id: HalfTermId,
        f: impl FnOnce(&mut HalfTerm),
    ) -> Result<Vec<HalfTerm>, EngineError> {
        let mut next = self
            .partitions
            .get(partition)
            .cloned()
            .ok_or_else(|| EngineError::PartitionNotLoaded(partition.to_string()))?;
        if let Some(term) = next.iter_mut().find(|t| t.id == id) {
            f(term);
            term.updated_at = Some(Utc::now());
        }
        Ok(next)
    }

    fn update_partition(
        &mut self,
        partition: &Partition,
        operation: &'static str,
        id: HalfTermId,
        f: impl FnOnce(&mut HalfTerm),
    ) -> Result<(), EngineError> {
        let next = self.stage(partition, id, f)?;
        self.commit(partition, operation, next)
    }

    fn commit(
        &mut self,
        partition: &Partition,
        operation: &'static str,
        next: Vec<HalfTerm>,
    ) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put_json(keys::half_terms(partition), &next)?;
        let sheet_name = partition.sheet_key();
        let mirrored = next.clone();
        self.gateway.write(operation, batch, move |ctx| {
            push_half_terms(ctx, sheet_name, mirrored)
        })?;
        self.partitions.insert(partition.clone(), next);
        Ok(())
    }

    pub(crate) fn install(&mut self, partition: &Partition, terms: Vec<HalfTerm>) {
        self.partitions.insert(partition.clone(), terms);
    }
}
