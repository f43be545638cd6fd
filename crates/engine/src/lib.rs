pub mod activities;
pub mod config;
pub mod error;
pub mod gateway;
pub mod half_terms;
pub mod lessons;
pub mod logging;
pub mod plans;
pub mod renumber;
pub mod stacks;
pub mod units;

pub use activities::ActivityStore;
pub use config::EngineConfig;
pub use error::EngineError;
pub use gateway::{LoadSource, RemoteCtx, Snapshot, SyncEvent, SyncGateway, SyncStats};
pub use half_terms::HalfTermIndex;
pub use lessons::LessonStore;
pub use plans::PlanStore;
pub use renumber::{NumberMapping, RenumberTargets, RenumberingEngine};
pub use stacks::{ActivityStackStore, StackPatch};
pub use units::UnitStore;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use lessonsync_core::{
    Activity, ActivityStack, HalfTerm, HalfTermId, LessonData, LessonDraft, LessonNumber,
    Partition, StackId, TenantId, TermHint,
};
use lessonsync_storage::{keys, RemoteStore, RestRemote, SqliteCache, StorageError, WriteBatch};

use crate::half_terms::push_half_terms;
use crate::lessons::push_sheet;

/// A half-term with its references resolved against the live stores.
#[derive(Debug)]
pub struct HalfTermView<'a> {
    pub term: HalfTerm,
    pub lessons: Vec<(LessonNumber, &'a LessonData)>,
    pub stacks: Vec<&'a ActivityStack>,
}

/// One session over one tenant's data. Every mutation takes `&mut self`, so
/// writes are serialized; only the remote mirror runs in the background.
pub struct Engine {
    config: EngineConfig,
    gateway: SyncGateway,
    activities: ActivityStore,
    stacks: ActivityStackStore,
    lessons: LessonStore,
    half_terms: HalfTermIndex,
    plans: PlanStore,
    units: UnitStore,
    renumbering: RenumberingEngine,
}

impl Engine {
    pub fn new(config: EngineConfig, gateway: SyncGateway) -> Self {
        Self {
            activities: ActivityStore::new(gateway.clone()),
            stacks: ActivityStackStore::new(gateway.clone()),
            lessons: LessonStore::new(gateway.clone()),
            half_terms: HalfTermIndex::new(gateway.clone(), config.half_term_capacity),
            plans: PlanStore::new(gateway.clone()),
            units: UnitStore::new(gateway.clone()),
            renumbering: RenumberingEngine::new(gateway.clone()),
            gateway,
            config,
        }
    }

    /// SQLite cache at `local_cache_path`, plus the REST remote when
    /// configured. Installs the `log_filter` subscriber unless the host has
    /// already set one. Must be called inside a tokio runtime.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        if logging::init(&config.log_filter).is_err() {
            debug!("tracing subscriber already installed, keeping it");
        }
        let local = SqliteCache::open(&config.local_cache_path)?;
        let remote = match &config.remote {
            Some(rest) => Some(Arc::new(RestRemote::new(rest.clone())?) as Arc<dyn RemoteStore>),
            None => None,
        };
        let gateway = SyncGateway::new(
            local,
            remote,
            TenantId::new(config.tenant_id.clone()),
            config.event_buffer,
        )?;
        info!(
            tenant = %config.tenant_id,
            cache = %config.local_cache_path,
            offline = gateway.is_offline(),
            "engine opened"
        );
        Ok(Self::new(config, gateway))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.gateway.subscribe()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.gateway.stats()
    }

    /// Waits for outstanding remote writes.
    pub async fn flush(&self) {
        self.gateway.flush().await;
    }

    pub fn activities(&self) -> &ActivityStore {
        &self.activities
    }

    pub fn activities_mut(&mut self) -> &mut ActivityStore {
        &mut self.activities
    }

    pub fn stacks(&self) -> &ActivityStackStore {
        &self.stacks
    }

    pub fn stacks_mut(&mut self) -> &mut ActivityStackStore {
        &mut self.stacks
    }

    pub fn lessons(&self) -> &LessonStore {
        &self.lessons
    }

    pub fn lessons_mut(&mut self) -> &mut LessonStore {
        &mut self.lessons
    }

    pub fn half_terms(&self) -> &HalfTermIndex {
        &self.half_terms
    }

    pub fn half_terms_mut(&mut self) -> &mut HalfTermIndex {
        &mut self.half_terms
    }

    pub fn plans(&self) -> &PlanStore {
        &self.plans
    }

    pub fn plans_mut(&mut self) -> &mut PlanStore {
        &mut self.plans
    }

    pub fn units(&self) -> &UnitStore {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitStore {
        &mut self.units
    }

    /// Tenant-wide collections: the activity library, stacks and plans.
    pub async fn load_library(&mut self) -> Result<(), EngineError> {
        self.activities.load().await?;
        self.stacks.load().await?;
        self.plans.load().await?;
        Ok(())
    }

    /// Lessons, half-terms and units of one partition.
    pub async fn open_partition(&mut self, partition: &Partition) -> Result<(), EngineError> {
        self.lessons.load(partition).await?;
        self.half_terms.load(partition).await?;
        if !self.units.is_loaded(partition.collection()) {
            self.units.load(partition.collection()).await?;
        }
        Ok(())
    }

    /// Stores `draft` under the next free number and places it in a half-term.
    pub fn create_lesson(
        &mut self,
        partition: &Partition,
        mut draft: LessonDraft,
        hint: Option<TermHint>,
    ) -> Result<LessonNumber, EngineError> {
        let number = self.lessons.next_number(partition);
        if draft.academic_year.is_none() {
            draft.academic_year = Some(partition.academic_year().to_string());
        }
        self.save_lesson(partition, number, draft, Some(hint), "lessons.create")?;
        info!(%partition, %number, "lesson created");
        Ok(number)
    }

    /// Adds a copy of `activity` to lesson `number`. A lesson created this
    /// way is auto-assigned to a half-term.
    pub fn assign_activity(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        activity: Activity,
        hint: Option<TermHint>,
    ) -> Result<LessonData, EngineError> {
        let placement = (!self.lessons.contains(partition, number)).then_some(hint);
        let mut draft = self.lessons.draft_for(partition, number);
        draft.push(activity);
        self.save_lesson(partition, number, draft, placement, "lessons.assign_activity")
    }

    pub fn delete_lesson(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
    ) -> Result<NumberMapping, EngineError> {
        self.renumbering.delete_and_renumber(
            partition,
            number,
            RenumberTargets {
                lessons: &mut self.lessons,
                half_terms: &mut self.half_terms,
                plans: &mut self.plans,
                units: &mut self.units,
            },
        )
    }

    /// Moves a stack's activities into lesson `number` and deletes the stack.
    /// The lesson is written first, so a failure never loses the activities.
    pub fn unstack_into_lesson(
        &mut self,
        stack: StackId,
        partition: &Partition,
        number: LessonNumber,
    ) -> Result<LessonData, EngineError> {
        let activities = self
            .stacks
            .get(stack)
            .map(|s| s.activities.clone())
            .ok_or_else(|| EngineError::StackNotFound(stack.to_string()))?;
        let placement = (!self.lessons.contains(partition, number)).then_some(None);
        let mut draft = self.lessons.draft_for(partition, number);
        for activity in activities {
            draft.push(activity);
        }
        let lesson = self.save_lesson(partition, number, draft, placement, "lessons.unstack")?;
        self.stacks.unstack(stack)?;
        Ok(lesson)
    }

    /// Writes a lesson and, when `placement` is given, its half-term slot in
    /// one local batch. Memory changes only after the batch commits.
    fn save_lesson(
        &mut self,
        partition: &Partition,
        number: LessonNumber,
        draft: LessonDraft,
        placement: Option<Option<TermHint>>,
        operation: &'static str,
    ) -> Result<LessonData, EngineError> {
        let (lesson, sheet) = self.lessons.stage_upsert(partition, number, draft)?;
        let placed = match placement {
            Some(hint) => self.half_terms.stage_auto_assign(partition, number, hint)?,
            None => None,
        };

        let mut batch = WriteBatch::new();
        batch.put_json(keys::lessons(partition), &sheet)?;
        if let Some((_, terms)) = &placed {
            batch.put_json(keys::half_terms(partition), terms)?;
        }
        let sheet_name = partition.sheet_key();
        let remote_sheet = sheet.clone();
        let remote_terms = placed.as_ref().map(|(_, terms)| terms.clone());
        self.gateway.write(operation, batch, move |ctx| async move {
            push_sheet(ctx.clone(), sheet_name.clone(), remote_sheet).await?;
            if let Some(terms) = remote_terms {
                push_half_terms(ctx, sheet_name, terms).await?;
            }
            Ok::<(), StorageError>(())
        })?;

        self.lessons.install(partition, sheet);
        if let Some((target, terms)) = placed {
            self.half_terms.install(partition, terms);
            debug!(%partition, %number, half_term = %target, "lesson auto-assigned");
        }
        Ok(lesson)
    }

    /// One bucket with stale lesson and stack references filtered out.
    pub fn half_term(&self, partition: &Partition, id: HalfTermId) -> Option<HalfTermView<'_>> {
        let mut term = self.half_terms.term(partition, id)?.clone();
        term.lessons = self.half_terms.get(partition, id, &self.lessons);
        term.stacks = self.half_terms.stacks(partition, id, &self.stacks);
        let lessons = term
            .lessons
            .iter()
            .filter_map(|n| self.lessons.get(partition, *n).map(|l| (*n, l)))
            .collect();
        let stacks = term
            .stacks
            .iter()
            .filter_map(|s| self.stacks.get(*s))
            .collect();
        Some(HalfTermView { term, lessons, stacks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessonsync_storage::{MemoryCache, MemoryRemote};

    fn n(v: u32) -> LessonNumber {
        LessonNumber::new(v).unwrap()
    }

    async fn engine() -> Result<(Engine, Partition), EngineError> {
        let config = EngineConfig {
            active_academic_year: "2024-2025".into(),
            ..EngineConfig::default()
        };
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemote::new());
        let gateway = SyncGateway::new(MemoryCache::new(), Some(remote), TenantId::new("t"), 16)?;
        let mut engine = Engine::new(config, gateway);
        let partition = engine.config().active_partition("LKG")?;
        engine.load_library().await?;
        engine.open_partition(&partition).await?;
        Ok((engine, partition))
    }

    #[tokio::test]
    async fn open_installs_a_subscriber() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = EngineConfig {
            tenant_id: "t".into(),
            active_academic_year: "2024-2025".into(),
            local_cache_path: dir.path().join("cache.db").to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        let engine = Engine::open(config)?;
        assert!(tracing::dispatcher::has_been_set());
        assert!(engine.gateway().is_offline());
        Ok(())
    }

    #[tokio::test]
    async fn create_lesson_numbers_and_places_it() -> Result<(), EngineError> {
        let (mut engine, p) = engine().await?;
        let draft = LessonDraft::from_activities([Activity::new("w", "Hi", "Welcome", 3)]);
        let first = engine.create_lesson(&p, draft.clone(), Some(TermHint::Spring))?;
        let second = engine.create_lesson(&p, draft, None)?;
        assert_eq!((first, second), (n(1), n(2)));
        assert_eq!(engine.half_terms().locate(&p, first), Some(HalfTermId::SP1));
        assert_eq!(engine.half_terms().locate(&p, second), Some(HalfTermId::A1));
        assert_eq!(
            engine.lessons().get(&p, first).and_then(|l| l.academic_year.as_deref()),
            Some("2024-2025")
        );
        Ok(())
    }

    #[tokio::test]
    async fn half_term_view_resolves_references() -> Result<(), EngineError> {
        let (mut engine, p) = engine().await?;
        engine.assign_activity(&p, n(1), Activity::new("w", "Hi", "Welcome", 3), None)?;
        let stack = engine
            .stacks_mut()
            .create("Warm Up", vec![Activity::new("s", "Stretch", "Movement", 5)], None, None)?;
        engine.half_terms_mut().attach_stack(&p, HalfTermId::A1, stack.id)?;

        let view = engine.half_term(&p, HalfTermId::A1).unwrap();
        assert_eq!(view.lessons.len(), 1);
        assert_eq!(view.stacks[0].name, "Warm Up");
        Ok(())
    }

    #[tokio::test]
    async fn unstack_into_lesson_moves_activities() -> Result<(), EngineError> {
        let (mut engine, p) = engine().await?;
        let stack = engine.stacks_mut().create(
            "Warm Up",
            vec![
                Activity::new("a", "Stretch", "Movement", 5),
                Activity::new("b", "Clap", "Movement", 3),
            ],
            None,
            None,
        )?;
        let lesson = engine.unstack_into_lesson(stack.id, &p, n(1))?;
        assert_eq!(lesson.total_time, 8);
        assert!(!engine.stacks().contains(stack.id));
        assert_eq!(engine.half_terms().locate(&p, n(1)), Some(HalfTermId::A1));
        assert!(matches!(
            engine.unstack_into_lesson(stack.id, &p, n(1)),
            Err(EngineError::StackNotFound(_))
        ));
        Ok(())
    }
}
