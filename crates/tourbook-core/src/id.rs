//! # Record Identifiers
//!
//! Every record is keyed by a v4 UUID. Ids arrive from the outside world as
//! strings (path parameters, JSON references) and are parsed here so that a
//! malformed id surfaces as [`StoreError::InvalidId`] naming the offending
//! path.

use uuid::Uuid;

use crate::error::StoreError;

/// Parse a record id received at `path`.
pub fn parse_id(path: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value.trim()).map_err(|_| StoreError::InvalidId {
        path: path.to_string(),
        value: value.to_string(),
    })
}

/// Parse a list of record ids received at `path`, stopping at the first
/// malformed entry.
pub fn parse_ids<S: AsRef<str>>(path: &str, values: &[S]) -> Result<Vec<Uuid>, StoreError> {
    values.iter().map(|v| parse_id(path, v.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_id_with_path() {
        let err = parse_id("tour", "5c88fa8cf4afda39709c2955").unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidId {
                path: "tour".into(),
                value: "5c88fa8cf4afda39709c2955".into(),
            }
        );
    }

    #[test]
    fn parse_ids_stops_at_first_bad_entry() {
        let good = Uuid::new_v4().to_string();
        let err = parse_ids("guides", &[good.as_str(), "nope"]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { ref value, .. } if value == "nope"));
    }
}
