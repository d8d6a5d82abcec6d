//! Composite record identity.
//!
//! Every table is keyed by `(local_id, malette_id)`. Externally a record is
//! addressed by the path segment `"<local_id>-<malette_id>"`, local id first:
//! `"0-1"` is the record with local id 0 created by malette 1.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DbError;

/// Separator between the two halves of an external identifier.
pub const KEY_SEPARATOR: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey {
    pub local_id: i64,
    pub malette_id: i64,
}

impl CompositeKey {
    pub fn new(local_id: i64, malette_id: i64) -> Self {
        Self {
            local_id,
            malette_id,
        }
    }

    /// Build a key from the two nullable columns of an optional foreign-key
    /// pair. Both null is "no reference"; exactly one null is rejected.
    pub fn from_optional_pair(
        local_id: Option<i64>,
        malette_id: Option<i64>,
        table: &str,
        columns: [&str; 2],
    ) -> Result<Option<Self>, DbError> {
        match (local_id, malette_id) {
            (Some(local_id), Some(malette_id)) => Ok(Some(Self::new(local_id, malette_id))),
            (None, None) => Ok(None),
            _ => Err(DbError::PartialForeignKey {
                table: table.to_string(),
                columns: columns.join(", "),
            }),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.local_id, KEY_SEPARATOR, self.malette_id)
    }
}

impl FromStr for CompositeKey {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DbError::InvalidKey(s.to_string());

        let (local, malette) = s.split_once(KEY_SEPARATOR).ok_or_else(invalid)?;
        Ok(Self {
            local_id: parse_id(local).ok_or_else(invalid)?,
            malette_id: parse_id(malette).ok_or_else(invalid)?,
        })
    }
}

/// Non-negative decimal only: no sign, no whitespace.
fn parse_id(part: &str) -> Option<i64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_id_first() {
        let key: CompositeKey = "0-1".parse().unwrap();
        assert_eq!(key.local_id, 0);
        assert_eq!(key.malette_id, 1);
        assert_ne!(key, CompositeKey::new(1, 0));
    }

    #[test]
    fn test_display_matches_parse_order() {
        let key = CompositeKey::new(42, 7);
        assert_eq!(key.to_string(), "42-7");
        assert_eq!("42-7".parse::<CompositeKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_malformed_segments() {
        for bad in ["", "1", "1-", "-1", "a-1", "1-b", "1-2-3", " 1-2", "1--2", "+1-2"] {
            let result = bad.parse::<CompositeKey>();
            assert!(
                matches!(result, Err(DbError::InvalidKey(ref s)) if s == bad),
                "expected InvalidKey for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_optional_pair() {
        const TILE: [&str; 2] = ["id_tile", "id_tile_malette"];

        assert_eq!(
            CompositeKey::from_optional_pair(Some(3), Some(1), "lot", TILE).unwrap(),
            Some(CompositeKey::new(3, 1))
        );
        assert_eq!(
            CompositeKey::from_optional_pair(None, None, "lot", TILE).unwrap(),
            None
        );
        assert!(matches!(
            CompositeKey::from_optional_pair(Some(3), None, "lot", TILE),
            Err(DbError::PartialForeignKey { .. })
        ));
        assert!(matches!(
            CompositeKey::from_optional_pair(None, Some(1), "lot", TILE),
            Err(DbError::PartialForeignKey { .. })
        ));
    }
}
