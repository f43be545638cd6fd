use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Position of a lesson within one partition, starting at 1.
///
/// Persisted as a decimal string (`"12"`) for compatibility with the cache
/// layout, but ordered numerically, so `"2" < "10"`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LessonNumber(NonZeroU32);

impl LessonNumber {
    pub const FIRST: LessonNumber = LessonNumber(NonZeroU32::MIN);

    pub fn new(n: u32) -> Result<Self, CoreError> {
        NonZeroU32::new(n)
            .map(Self)
            .ok_or_else(|| CoreError::Validation("lesson number must be positive".into()))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The number after this one. Saturates at `u32::MAX`.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl FromStr for LessonNumber {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("invalid lesson number: {s:?}")))?;
        Self::new(n)
    }
}

impl TryFrom<u32> for LessonNumber {
    type Error = CoreError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl fmt::Display for LessonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LessonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lesson({})", self.0)
    }
}

impl Serialize for LessonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct LessonNumberVisitor;

impl Visitor<'_> for LessonNumberVisitor {
    type Value = LessonNumber;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a positive lesson number as a string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let n = u32::try_from(v).map_err(E::custom)?;
        LessonNumber::new(n).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        let n = u32::try_from(v).map_err(E::custom)?;
        LessonNumber::new(n).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for LessonNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LessonNumberVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn n(v: u32) -> LessonNumber {
        LessonNumber::new(v).unwrap()
    }

    #[test]
    fn orders_numerically_not_lexicographically() {
        let mut numbers: Vec<LessonNumber> =
            ["10", "2", "1", "21", "3"].iter().map(|s| s.parse().unwrap()).collect();
        numbers.sort();
        let rendered: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
        assert_eq!(rendered, vec!["1", "2", "3", "10", "21"]);
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!("0".parse::<LessonNumber>().is_err());
        assert!("-3".parse::<LessonNumber>().is_err());
        assert!("abc".parse::<LessonNumber>().is_err());
        assert!("".parse::<LessonNumber>().is_err());
        assert_eq!(" 7 ".parse::<LessonNumber>().unwrap(), n(7));
    }

    #[test]
    fn serializes_as_string_and_reads_either_form() {
        assert_eq!(serde_json::to_string(&n(12)).unwrap(), "\"12\"");
        let from_str: LessonNumber = serde_json::from_str("\"12\"").unwrap();
        let from_int: LessonNumber = serde_json::from_str("12").unwrap();
        assert_eq!(from_str, from_int);
        assert!(serde_json::from_str::<LessonNumber>("0").is_err());
    }

    #[test]
    fn works_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(n(10), "ten");
        map.insert(n(2), "two");
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2":"two","10":"ten"}"#);
        let back: BTreeMap<LessonNumber, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.keys().copied().collect::<Vec<_>>(), vec![n(2), n(10)]);
    }
}
