use lessonsync_core::{HalfTerm, HalfTermId, LessonNumber};
use lessonsync_engine::{EngineError, SyncEvent};
use lessonsync_harness::{standard_lesson, TestSession};
use lessonsync_storage::{keys, LocalCache, MemoryCache, StorageError};

// ============================================================================
// Remote failures never reach the caller
// ============================================================================

#[tokio::test]
async fn local_read_reflects_write_when_remote_throws() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    let mut events = s.engine.subscribe();
    s.set_remote_down(true);

    let number = s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    assert_eq!(s.numbers(), vec![number.get()]);
    assert!(s.cache.get(&keys::lessons(&p))?.is_some());

    s.engine.flush().await;
    assert!(matches!(events.recv().await?, SyncEvent::RemoteFailed { .. }));
    let stats = s.engine.sync_stats();
    assert!(stats.failed >= 1);
    assert_eq!(stats.succeeded, 0);
    assert!(s.remote.as_ref().unwrap().lesson_sheet(&s.tenant(), &p.sheet_key()).is_none());
    Ok(())
}

#[tokio::test]
async fn next_write_after_recovery_mirrors_everything() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    s.set_remote_down(true);
    s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;

    s.set_remote_down(false);
    s.engine.create_lesson(&p, standard_lesson("b", "Scarf Songs"), None)?;
    s.engine.flush().await;

    let sheet = s
        .remote
        .as_ref()
        .unwrap()
        .lesson_sheet(&s.tenant(), &p.sheet_key())
        .unwrap();
    assert_eq!(sheet.lesson_numbers.len(), 2);
    assert_eq!(s.engine.sync_stats().consecutive_failures, 0);
    Ok(())
}

#[tokio::test]
async fn offline_session_never_attempts_remote() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::offline().await?;
    let p = s.partition.clone();
    s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;
    assert!(s.engine.gateway().is_offline());
    assert_eq!(s.engine.sync_stats().attempted, 0);
    assert_eq!(s.numbers(), vec![1]);
    Ok(())
}

// ============================================================================
// Local failures are fatal
// ============================================================================

#[tokio::test]
async fn local_failure_is_surfaced_and_nothing_changes() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;
    let writes_before = s.remote.as_ref().unwrap().write_count();

    s.cache.set_fail_writes(true);
    let err = s
        .engine
        .create_lesson(&p, standard_lesson("b", "Core Songs"), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Local(_)));
    s.engine.flush().await;

    assert_eq!(s.numbers(), vec![1]);
    assert_eq!(s.remote.as_ref().unwrap().write_count(), writes_before);
    Ok(())
}

#[tokio::test]
async fn second_writer_on_stale_state_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut first = TestSession::offline().await?;
    let mut second = first.reopen("LKG", "2024-2025").await?;
    let p = first.partition.clone();

    first
        .engine
        .create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    let err = second
        .engine
        .create_lesson(&p, standard_lesson("b", "Scarf Songs"), None)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Local(StorageError::RevisionConflict { .. })
    ));
    assert!(second.numbers().is_empty());

    // Reloading picks up the other writer's lesson; the retry lands after it.
    second.engine.open_partition(&p).await?;
    let number = second
        .engine
        .create_lesson(&p, standard_lesson("b", "Scarf Songs"), None)?;
    assert_eq!(number, LessonNumber::new(2)?);
    Ok(())
}

#[tokio::test]
async fn lesson_and_its_half_term_commit_together() -> Result<(), Box<dyn std::error::Error>> {
    let mut first = TestSession::offline().await?;
    let mut second = first.reopen("LKG", "2024-2025").await?;
    let p = first.partition.clone();

    // Only the half-term key moves under the first session.
    second
        .engine
        .half_terms_mut()
        .set_complete(&p, HalfTermId::SM2, true)?;
    let err = first
        .engine
        .create_lesson(&p, standard_lesson("a", "Core Songs"), None)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Local(StorageError::RevisionConflict { .. })
    ));

    assert!(first.numbers().is_empty());
    assert_eq!(first.engine.half_terms().locate(&p, LessonNumber::new(1)?), None);
    let restarted = first.reopen("LKG", "2024-2025").await?;
    assert!(restarted.numbers().is_empty());
    assert!(restarted
        .engine
        .half_terms()
        .term(&p, HalfTermId::SM2)
        .is_some_and(|t| t.is_complete));
    Ok(())
}

// ============================================================================
// Startup loads
// ============================================================================

#[tokio::test]
async fn unreachable_remote_at_startup_uses_local_cache() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;

    s.set_remote_down(true);
    let restarted = s.reopen("LKG", "2024-2025").await?;
    assert_eq!(restarted.numbers(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn remote_data_seeds_a_fresh_cache() -> Result<(), Box<dyn std::error::Error>> {
    let mut s = TestSession::new().await?;
    let p = s.partition.clone();
    s.engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
    s.engine.flush().await;

    let fresh = MemoryCache::new();
    let other_device = TestSession::build(fresh.clone(), s.remote.clone(), "LKG", "2024-2025").await?;
    assert_eq!(other_device.numbers(), vec![1]);
    assert!(fresh.get(&keys::lessons(&p))?.is_some());
    Ok(())
}

#[tokio::test]
async fn first_start_persists_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let s = TestSession::offline().await?;
    let stored = s.cache.get(&keys::half_terms(&s.partition))?.unwrap();
    let terms: Vec<HalfTerm> = serde_json::from_value(stored.value)?;
    assert_eq!(terms.len(), 6);
    assert!(s.cache.get(keys::ACTIVITY_STACKS)?.is_some());
    assert!(s.cache.get(keys::LESSON_PLANS)?.is_some());
    Ok(())
}

#[tokio::test]
async fn sqlite_backed_engine_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    use lessonsync_engine::{Engine, EngineConfig};

    let dir = tempfile::tempdir()?;
    let config = EngineConfig {
        tenant_id: "teacher-1".into(),
        active_academic_year: "2024-2025".into(),
        local_cache_path: dir.path().join("cache.db").to_string_lossy().into_owned(),
        ..EngineConfig::default()
    };
    let p = config.active_partition("LKG")?;
    {
        let mut engine = Engine::open(config.clone())?;
        engine.load_library().await?;
        engine.open_partition(&p).await?;
        engine.create_lesson(&p, standard_lesson("a", "Core Songs"), None)?;
        engine.create_lesson(&p, standard_lesson("b", "Core Songs"), None)?;
        engine.delete_lesson(&p, LessonNumber::new(1)?)?;
    }
    let mut engine = Engine::open(config)?;
    engine.open_partition(&p).await?;
    assert_eq!(engine.lessons().list_numbers(&p), vec![LessonNumber::new(1)?]);
    Ok(())
}
