//! Local cache key layout. Values under every key are JSON.

use lessonsync_core::Partition;

pub const LIBRARY_ACTIVITIES: &str = "library-activities";
pub const ACTIVITY_STACKS: &str = "activity-stacks";
pub const LESSON_PLANS: &str = "user-created-lesson-plans";

/// Year-unaware lesson blob written by older clients. Read-only fallback.
pub fn legacy_lessons(collection: &str) -> String {
    format!("lesson-data-{collection}")
}

pub fn lessons(partition: &Partition) -> String {
    format!("lesson-data-{}", partition.sheet_key())
}

pub fn half_terms(partition: &Partition) -> String {
    format!(
        "half-terms-{}-{}",
        partition.collection(),
        partition.academic_year()
    )
}

pub fn units(collection: &str) -> String {
    format!("units-{collection}")
}
