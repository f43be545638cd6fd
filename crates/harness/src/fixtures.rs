use lessonsync_core::{Activity, LessonDraft};

/// Activity named after its id and category.
pub fn activity(id: &str, category: &str, time: u32) -> Activity {
    Activity::new(id, format!("{category} {id}"), category, time)
}

/// A lesson made of `(category, minutes)` pairs. Ids are derived from
/// `tag` so lessons built from the same pairs stay distinguishable.
pub fn lesson(tag: &str, parts: &[(&str, u32)]) -> LessonDraft {
    LessonDraft::from_activities(
        parts
            .iter()
            .enumerate()
            .map(|(i, (category, time))| activity(&format!("{tag}-{i}"), category, *time)),
    )
}

/// The Welcome / focus / Goodbye shape most real lessons have.
pub fn standard_lesson(tag: &str, focus: &str) -> LessonDraft {
    lesson(tag, &[("Welcome", 5), (focus, 10), (focus, 8), ("Goodbye", 3)])
}
