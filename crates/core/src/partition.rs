use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Namespace for lessons and half-terms: one collection ("sheet") in one
/// academic year. The same collection holds disjoint data per year.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    collection: String,
    academic_year: String,
}

impl Partition {
    pub fn new(collection: impl Into<String>, academic_year: impl Into<String>) -> Result<Self, CoreError> {
        let collection = collection.into();
        let academic_year = academic_year.into();
        if collection.trim().is_empty() {
            return Err(CoreError::Validation("collection name is empty".into()));
        }
        validate_academic_year(&academic_year)?;
        Ok(Self {
            collection,
            academic_year,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn academic_year(&self) -> &str {
        &self.academic_year
    }

    /// Whether a record tagged with `year` is visible in this partition.
    /// Untagged records belong to whichever partition reads them.
    pub fn admits(&self, year: Option<&str>) -> bool {
        year.is_none_or(|y| y == self.academic_year)
    }

    /// Remote `sheet_name` and local key suffix, e.g. `LKG-2024-2025`.
    pub fn sheet_key(&self) -> String {
        format!("{}-{}", self.collection, self.academic_year)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.academic_year)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition({self})")
    }
}

/// Accepts `YYYY-YYYY` where the second year follows the first.
pub fn validate_academic_year(year: &str) -> Result<(), CoreError> {
    let invalid = || CoreError::Validation(format!("invalid academic year: {year:?}"));
    let (start, end) = year.split_once('-').ok_or_else(invalid)?;
    if start.len() != 4 || end.len() != 4 {
        return Err(invalid());
    }
    let start: u32 = start.parse().map_err(|_| invalid())?;
    let end: u32 = end.parse().map_err(|_| invalid())?;
    if end != start + 1 {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_year_format() {
        assert!(validate_academic_year("2024-2025").is_ok());
        assert!(validate_academic_year("2024-2026").is_err());
        assert!(validate_academic_year("24-25").is_err());
        assert!(validate_academic_year("2024/2025").is_err());
        assert!(Partition::new("", "2024-2025").is_err());
    }

    #[test]
    fn admits_own_year_and_untagged() {
        let p = Partition::new("LKG", "2024-2025").unwrap();
        assert!(p.admits(None));
        assert!(p.admits(Some("2024-2025")));
        assert!(!p.admits(Some("2025-2026")));
        assert_eq!(p.sheet_key(), "LKG-2024-2025");
    }
}
