//! Request identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::QueueError;

/// Identifier of a queued request: dash-grouped hex in 8-4-4-4-12 digit
/// groups. Used as the persisted-pool key and as an idempotency header, so
/// uniqueness is probabilistic, not cryptographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap a string the generator already produced in the right shape.
    /// Host-supplied strings go through [`RequestId::parse`] instead.
    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    /// Validate and wrap a host-supplied identifier string.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        if is_well_formed(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(QueueError::Validation(format!(
                "malformed request id: {raw:?}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn is_well_formed(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('-').collect();
    parts.len() == 5
        && parts
            .iter()
            .zip([8usize, 4, 4, 4, 12])
            .all(|(part, len)| part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_the_guid_shape() {
        let id = RequestId::parse("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(id.as_str(), "00112233-4455-6677-8899-aabbccddeeff");
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        for raw in [
            "",
            "not-an-id",
            "00112233-4455-6677-8899",
            "00112233-4455-6677-8899-aabbccddeef",
            "0011223g-4455-6677-8899-aabbccddeeff",
            "001122334455-6677-8899-aabbccddeeff",
        ] {
            assert!(
                matches!(RequestId::parse(raw), Err(QueueError::Validation(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn serializes_as_a_bare_string() {
        let id = RequestId::parse("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00112233-4455-6677-8899-aabbccddeeff\"");
    }
}
