use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::ids::StackId;

/// A named bundle of activity copies. Independent of any lesson: editing a
/// lesson never changes a stack and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStack {
    pub id: StackId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    pub total_time: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityStack {
    pub fn new(
        name: impl Into<String>,
        activities: Vec<Activity>,
        description: Option<String>,
        category: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let category = category.or_else(|| activities.first().map(|a| a.category.clone()));
        let mut stack = Self {
            id: StackId::new(),
            name: name.into(),
            description,
            activities,
            total_time: 0,
            category,
            created_at: now,
            updated_at: now,
        };
        stack.recompute();
        stack
    }

    /// Refreshes `total_time` from the current activity list.
    pub fn recompute(&mut self) {
        self.total_time = self
            .activities
            .iter()
            .fold(0u32, |acc, a| acc.saturating_add(a.time));
    }

    pub fn touch(&mut self) {
        self.recompute();
        self.updated_at = Utc::now();
    }
}
