use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use lessonsync_core::{lesson::compare_categories, LessonData, LessonNumber, Partition};

/// Persisted shape of one partition's lessons, shared by the local cache
/// blob and the remote `lessons` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSheet {
    #[serde(default)]
    pub all_lessons_data: BTreeMap<LessonNumber, LessonData>,
    #[serde(default)]
    pub lesson_numbers: Vec<LessonNumber>,
    #[serde(default)]
    pub teaching_units: Vec<String>,
    #[serde(default)]
    pub lesson_standards: BTreeMap<LessonNumber, BTreeSet<String>>,
}

impl LessonSheet {
    pub fn is_empty(&self) -> bool {
        self.all_lessons_data.is_empty()
    }

    /// Recomputes the derived index arrays from `all_lessons_data`.
    pub fn reindex(&mut self) {
        self.lesson_numbers = self.all_lessons_data.keys().copied().collect();
        let categories: BTreeSet<&String> = self
            .all_lessons_data
            .values()
            .flat_map(|l| l.category_order.iter())
            .collect();
        let mut units: Vec<String> = categories.into_iter().cloned().collect();
        units.sort_by(|a, b| compare_categories(a, b));
        self.teaching_units = units;
        self.lesson_standards
            .retain(|n, _| self.all_lessons_data.contains_key(n));
    }

    /// Drops lessons tagged with a different academic year. Untagged lessons
    /// stay untagged.
    pub fn retain_partition(&mut self, partition: &Partition) {
        self.all_lessons_data
            .retain(|_, l| partition.admits(l.academic_year.as_deref()));
        self.reindex();
    }
}
