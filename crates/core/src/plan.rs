use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::ids::{PlanId, UnitId};
use crate::lesson_number::LessonNumber;
use crate::partition::Partition;
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Planned,
    Draft,
    Completed,
    Cancelled,
}

/// A dated, user-created plan. May point at a lesson by number; renumbering
/// rewrites that pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
    pub id: PlanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub week: u32,
    #[serde(default)]
    pub class_name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_number: Option<LessonNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LessonPlan {
    pub fn new(id: impl Into<PlanId>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            date: None,
            week: 0,
            class_name: String::new(),
            title: title.into(),
            lesson_number: None,
            collection: None,
            academic_year: None,
            activities: Vec::new(),
            notes: String::new(),
            status: PlanStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::Validation("lesson plan id is empty".into()));
        }
        if self.title.trim().is_empty() {
            return Err(CoreError::Validation(format!("lesson plan {} has no title", self.id)));
        }
        for activity in &self.activities {
            activity.validate()?;
        }
        Ok(())
    }

    /// Whether this plan's lesson pointer lives in `partition`. A plan must
    /// name the collection; an untagged year is admitted like an untagged
    /// lesson.
    pub fn belongs_to(&self, partition: &Partition) -> bool {
        self.collection.as_deref() == Some(partition.collection())
            && partition.admits(self.academic_year.as_deref())
    }

    pub fn total_time(&self) -> u32 {
        self.activities
            .iter()
            .fold(0u32, |acc, a| acc.saturating_add(a.time))
    }
}

/// A teaching unit: a named, ordered selection of lessons in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lesson_numbers: Vec<LessonNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Unit {
    pub fn new(name: impl Into<String>, lesson_numbers: Vec<LessonNumber>) -> Self {
        let now = Utc::now();
        Self {
            id: UnitId::new(),
            name: name.into(),
            description: String::new(),
            lesson_numbers,
            color: None,
            academic_year: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_validation() {
        assert!(LessonPlan::new("p1", "Monday").validate().is_ok());
        assert!(LessonPlan::new("", "Monday").validate().is_err());
        assert!(LessonPlan::new("p1", " ").validate().is_err());
        let mut plan = LessonPlan::new("p1", "Monday");
        plan.activities.push(Activity::new("a", "", "Welcome", 3));
        assert!(plan.validate().is_err());
    }

    #[test]
    fn plan_partition_membership() {
        let p = Partition::new("LKG", "2024-2025").unwrap();
        let mut plan = LessonPlan::new("p1", "Monday");
        assert!(!plan.belongs_to(&p));
        plan.collection = Some("UKG".into());
        assert!(!plan.belongs_to(&p));
        plan.collection = Some("LKG".into());
        assert!(plan.belongs_to(&p));
        plan.academic_year = Some("2025-2026".into());
        assert!(!plan.belongs_to(&p));
        plan.academic_year = Some("2024-2025".into());
        assert!(plan.belongs_to(&p));
    }
}
