use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::ActivityId;
use crate::lesson_number::LessonNumber;
use crate::CoreError;

/// Media attached to an activity. All optional; empty strings are
/// normalized to `None` by [`Resources::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vimeo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canva: Option<String>,
}

impl Resources {
    pub fn normalized(self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Self {
            video: clean(self.video),
            music: clean(self.music),
            backing: clean(self.backing),
            resource: clean(self.resource),
            link: clean(self.link),
            vimeo: clean(self.vimeo),
            image: clean(self.image),
            canva: clean(self.canva),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: ActivityId,
    #[serde(rename = "activity")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Minutes.
    #[serde(default)]
    pub time: u32,
    #[serde(default, skip_serializing_if = "Resources::is_empty")]
    pub resources: Resources,
    pub category: String,
    #[serde(default)]
    pub year_groups: BTreeSet<String>,
    #[serde(default, rename = "eyfsStandards")]
    pub standards: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_number: Option<LessonNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,
}

impl Activity {
    pub fn new(id: impl Into<ActivityId>, name: impl Into<String>, category: impl Into<String>, time: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            time,
            resources: Resources::default(),
            category: category.into(),
            year_groups: BTreeSet::new(),
            standards: BTreeSet::new(),
            lesson_number: None,
            unit_name: None,
        }
    }

    /// Shape checks applied before an activity reaches any store.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::Validation("activity id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation(format!("activity {} has no name", self.id)));
        }
        if self.category.trim().is_empty() {
            return Err(CoreError::Validation(format!("activity {} has no category", self.id)));
        }
        Ok(())
    }

    pub fn with_lesson_number(mut self, number: Option<LessonNumber>) -> Self {
        self.lesson_number = number;
        self
    }
}
