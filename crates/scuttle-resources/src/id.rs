//! Composite resource ids.
//!
//! External ids are pipe-delimited: `<kind>|<clusterId>|<discriminator...>`.
//! Parsers validate the segment count and the leading kind tag and return
//! typed errors; malformed ids from an import must never panic.

use crate::error::{ResourceError, ResourceResult};

/// Build a composite id from its kind tag and segments.
pub fn compose(kind: &str, segments: &[&str]) -> String {
    let mut id = String::from(kind);
    for segment in segments {
        id.push('|');
        id.push_str(segment);
    }
    id
}

/// Split a composite id, checking the kind tag and the exact segment
/// count (excluding the tag itself).
pub fn split(kind: &str, id: &str, segments: usize) -> ResourceResult<Vec<String>> {
    let parts: Vec<&str> = id.split('|').collect();
    if parts.len() != segments + 1 {
        return Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: format!("expected {} segments, found {}", segments + 1, parts.len()),
        });
    }
    if parts[0] != kind {
        return Err(ResourceError::InvalidId {
            id: id.to_string(),
            reason: format!("id must start with {kind:?}"),
        });
    }
    Ok(parts[1..].iter().map(|part| part.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_and_split_round_trip() {
        let id = compose("changefeed", &["cluster-1", "42"]);
        assert_eq!(id, "changefeed|cluster-1|42");
        let parts = split("changefeed", &id, 2).unwrap();
        assert_eq!(parts, vec!["cluster-1", "42"]);
    }

    #[test]
    fn split_rejects_wrong_kind() {
        let err = split("cursor", "user|c|k", 2).unwrap_err();
        assert!(matches!(err, ResourceError::InvalidId { .. }));
    }

    #[test]
    fn split_rejects_wrong_segment_count() {
        assert!(split("cursor", "cursor|c", 2).is_err());
        assert!(split("cursor", "cursor|c|k|extra", 2).is_err());
    }
}
