use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::activity::Activity;

/// Display preference for categories. Anything not listed sorts after these,
/// alphabetically.
pub const CATEGORY_PREFERENCE: &[&str] = &[
    "Welcome",
    "Kodaly Songs",
    "Kodaly Action Songs",
    "Action/Games Songs",
    "Rhythm Sticks",
    "Scarf Songs",
    "General Game",
    "Core Songs",
    "Parachute Games",
    "Percussion Games",
    "Teaching Units",
    "Goodbye",
];

/// Categories that name a whole lesson when present.
const FOCUS_TITLES: &[(&str, &str)] = &[
    ("Rhythm Sticks", "Rhythm Sticks Session"),
    ("Scarf Songs", "Scarf Movement Lesson"),
    ("Parachute Games", "Parachute Play"),
    ("Percussion Games", "Percussion Exploration"),
];

const WELCOME: &str = "Welcome";
const GOODBYE: &str = "Goodbye";

pub fn compare_categories(a: &str, b: &str) -> Ordering {
    let rank = |c: &str| CATEGORY_PREFERENCE.iter().position(|p| *p == c);
    match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Caller-supplied content of a lesson. Derived fields are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonDraft {
    pub grouped: BTreeMap<String, Vec<Activity>>,
    pub title: Option<String>,
    pub standards: BTreeSet<String>,
    pub academic_year: Option<String>,
}

impl LessonDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups activities by their category, keeping input order within a group.
    pub fn from_activities(activities: impl IntoIterator<Item = Activity>) -> Self {
        let mut draft = Self::new();
        for activity in activities {
            draft.push(activity);
        }
        draft
    }

    pub fn push(&mut self, activity: Activity) {
        self.grouped
            .entry(activity.category.clone())
            .or_default()
            .push(activity);
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonData {
    pub grouped: BTreeMap<String, Vec<Activity>>,
    pub category_order: Vec<String>,
    pub total_time: u32,
    pub title: String,
    #[serde(default)]
    pub custom_title: bool,
    #[serde(default, rename = "eyfsStandards")]
    pub standards: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
}

impl LessonData {
    /// Builds a lesson from a draft, computing every derived field.
    pub fn from_draft(draft: LessonDraft) -> Self {
        let grouped: BTreeMap<String, Vec<Activity>> = draft
            .grouped
            .into_iter()
            .filter(|(_, activities)| !activities.is_empty())
            .collect();

        let mut category_order: Vec<String> = grouped.keys().cloned().collect();
        category_order.sort_by(|a, b| compare_categories(a, b));

        let total_time = grouped
            .values()
            .flatten()
            .fold(0u32, |acc, a| acc.saturating_add(a.time));

        let custom_title = draft
            .title
            .as_ref()
            .is_some_and(|t| !t.trim().is_empty());
        let title = match draft.title {
            Some(t) if custom_title => t,
            _ => synthesize_title(&grouped, &category_order),
        };

        Self {
            grouped,
            category_order,
            total_time,
            title,
            custom_title,
            standards: draft.standards,
            academic_year: draft.academic_year,
        }
    }

    /// Back to an editable draft. A synthesized title is dropped so that it is
    /// regenerated from the new composition.
    pub fn to_draft(&self) -> LessonDraft {
        LessonDraft {
            grouped: self.grouped.clone(),
            title: self.custom_title.then(|| self.title.clone()),
            standards: self.standards.clone(),
            academic_year: self.academic_year.clone(),
        }
    }

    /// Activities in display order: by category order, then insertion order.
    pub fn activities(&self) -> impl Iterator<Item = &Activity> {
        self.category_order
            .iter()
            .filter_map(|c| self.grouped.get(c))
            .flatten()
    }

    pub fn activities_mut(&mut self) -> impl Iterator<Item = &mut Activity> {
        self.grouped.values_mut().flatten()
    }

    pub fn activity_count(&self) -> usize {
        self.grouped.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.activity_count() == 0
    }
}

fn synthesize_title(grouped: &BTreeMap<String, Vec<Activity>>, order: &[String]) -> String {
    if order.is_empty() {
        return "Lesson".to_string();
    }

    if grouped.contains_key(WELCOME) && grouped.contains_key(GOODBYE) {
        // max_by_key keeps the last maximum, so walk the order backwards to
        // break ties in favour of the earlier category.
        let dominant = order
            .iter()
            .rev()
            .filter(|c| *c != WELCOME && *c != GOODBYE)
            .max_by_key(|c| grouped.get(*c).map_or(0, Vec::len));
        if let Some(category) = dominant {
            return format!("{category} Lesson");
        }
    }

    for (category, title) in FOCUS_TITLES {
        if grouped.contains_key(*category) {
            return (*title).to_string();
        }
    }

    format!("{} Lesson", order[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(id: &str, category: &str, time: u32) -> Activity {
        Activity::new(id, format!("activity {id}"), category, time)
    }

    #[test]
    fn derives_total_time_and_order() {
        let lesson = LessonData::from_draft(LessonDraft::from_activities([
            act("1", "Goodbye", 3),
            act("2", "Zumba", 10),
            act("3", "Welcome", 5),
            act("4", "Core Songs", 7),
            act("5", "Art", 4),
        ]));
        assert_eq!(lesson.total_time, 29);
        assert_eq!(
            lesson.category_order,
            vec!["Welcome", "Core Songs", "Goodbye", "Art", "Zumba"]
        );
    }

    #[test]
    fn drops_empty_groups() {
        let mut draft = LessonDraft::from_activities([act("1", "Welcome", 5)]);
        draft.grouped.insert("Empty".into(), Vec::new());
        let lesson = LessonData::from_draft(draft);
        assert_eq!(lesson.category_order, vec!["Welcome"]);
        assert!(!lesson.grouped.contains_key("Empty"));
    }

    #[test]
    fn title_from_dominant_category_between_welcome_and_goodbye() {
        let lesson = LessonData::from_draft(LessonDraft::from_activities([
            act("1", "Welcome", 5),
            act("2", "Kodaly Songs", 5),
            act("3", "Scarf Songs", 5),
            act("4", "Scarf Songs", 5),
            act("5", "Goodbye", 5),
        ]));
        assert_eq!(lesson.title, "Scarf Songs Lesson");
        assert!(!lesson.custom_title);
    }

    #[test]
    fn dominant_tie_prefers_earlier_category() {
        let lesson = LessonData::from_draft(LessonDraft::from_activities([
            act("1", "Welcome", 5),
            act("2", "Scarf Songs", 5),
            act("3", "Kodaly Songs", 5),
            act("4", "Goodbye", 5),
        ]));
        assert_eq!(lesson.title, "Kodaly Songs Lesson");
    }

    #[test]
    fn focus_category_gets_fixed_title() {
        let lesson = LessonData::from_draft(LessonDraft::from_activities([
            act("1", "Rhythm Sticks", 5),
            act("2", "Core Songs", 5),
        ]));
        assert_eq!(lesson.title, "Rhythm Sticks Session");
    }

    #[test]
    fn falls_back_to_first_category() {
        let lesson = LessonData::from_draft(LessonDraft::from_activities([
            act("1", "Core Songs", 5),
            act("2", "Art", 5),
        ]));
        assert_eq!(lesson.title, "Core Songs Lesson");
        assert_eq!(LessonData::from_draft(LessonDraft::new()).title, "Lesson");
    }

    #[test]
    fn custom_title_survives_round_trip_through_draft() {
        let lesson = LessonData::from_draft(
            LessonDraft::from_activities([act("1", "Core Songs", 5)]).with_title("Harvest"),
        );
        assert!(lesson.custom_title);
        let mut draft = lesson.to_draft();
        draft.push(act("2", "Rhythm Sticks", 5));
        assert_eq!(LessonData::from_draft(draft).title, "Harvest");

        let generated = LessonData::from_draft(LessonDraft::from_activities([act("1", "Core Songs", 5)]));
        let mut draft = generated.to_draft();
        draft.push(act("2", "Rhythm Sticks", 5));
        assert_eq!(LessonData::from_draft(draft).title, "Rhythm Sticks Session");
    }
}
