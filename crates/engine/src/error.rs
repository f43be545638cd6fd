use lessonsync_core::CoreError;
use lessonsync_storage::StorageError;
use thiserror::Error;

/// Errors surfaced to callers. Remote failures never appear here; they are
/// reported through [`crate::gateway::SyncEvent`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("local cache error: {0}")]
    Local(#[from] StorageError),

    #[error("validation error: {0}")]
    Validation(#[from] CoreError),

    #[error("lesson not found: {0}")]
    LessonNotFound(String),

    #[error("activity not found: {0}")]
    ActivityNotFound(String),

    #[error("activity stack not found: {0}")]
    StackNotFound(String),

    #[error("lesson plan not found: {0}")]
    PlanNotFound(String),

    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("partition not loaded: {0}")]
    PartitionNotLoaded(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
