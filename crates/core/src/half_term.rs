use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::StackId;
use crate::lesson_number::LessonNumber;
use crate::CoreError;

/// The six fixed buckets of an academic year, two per term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HalfTermId {
    A1,
    A2,
    SP1,
    SP2,
    SM1,
    SM2,
}

impl HalfTermId {
    pub const ALL: [HalfTermId; 6] = [
        HalfTermId::A1,
        HalfTermId::A2,
        HalfTermId::SP1,
        HalfTermId::SP2,
        HalfTermId::SM1,
        HalfTermId::SM2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::SP1 => "SP1",
            Self::SP2 => "SP2",
            Self::SM1 => "SM1",
            Self::SM2 => "SM2",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::A1 => "Autumn 1",
            Self::A2 => "Autumn 2",
            Self::SP1 => "Spring 1",
            Self::SP2 => "Spring 2",
            Self::SM1 => "Summer 1",
            Self::SM2 => "Summer 2",
        }
    }
}

impl fmt::Display for HalfTermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HalfTermId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HalfTermId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown half-term: {s:?}")))
    }
}

/// Term named by an import row or UI flow, used to pick a bucket when the
/// caller did not choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermHint {
    Autumn,
    Spring,
    Summer,
}

impl TermHint {
    pub fn first_half(self) -> HalfTermId {
        match self {
            Self::Autumn => HalfTermId::A1,
            Self::Spring => HalfTermId::SP1,
            Self::Summer => HalfTermId::SM1,
        }
    }

    /// Case-insensitive; `None` for anything that is not a term name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "autumn" => Some(Self::Autumn),
            "spring" => Some(Self::Spring),
            "summer" => Some(Self::Summer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HalfTerm {
    pub id: HalfTermId,
    pub name: String,
    #[serde(default)]
    pub lessons: Vec<LessonNumber>,
    #[serde(default)]
    pub stacks: Vec<StackId>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl HalfTerm {
    pub fn empty(id: HalfTermId) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            lessons: Vec::new(),
            stacks: Vec::new(),
            is_complete: false,
            updated_at: None,
        }
    }

    /// The six empty buckets a partition starts with.
    pub fn defaults() -> Vec<HalfTerm> {
        HalfTermId::ALL.into_iter().map(HalfTerm::empty).collect()
    }

    pub fn contains(&self, number: LessonNumber) -> bool {
        self.lessons.contains(&number)
    }
}

/// Brings a stored list back to exactly six buckets in canonical order.
/// Missing buckets are recreated empty; duplicates keep the first copy.
pub fn normalize_half_terms(stored: Vec<HalfTerm>) -> Vec<HalfTerm> {
    HalfTermId::ALL
        .into_iter()
        .map(|id| {
            stored
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .unwrap_or_else(|| HalfTerm::empty(id))
        })
        .collect()
}
