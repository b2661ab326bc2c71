//! Transport failure payloads.

use serde_json::Value;

/// Failure reported by a transport attempt. Always retried per the backoff
/// policy (up to the retry budget); never surfaced as a `QueueError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Protocol-level status, when the transport has one (e.g. HTTP).
    pub status: Option<u16>,

    /// Raw response body.
    pub body: String,
}

impl TransportFailure {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            status: None,
            body: body.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Parse the body as structured data. Malformed payloads degrade to
    /// `{"error": <body>}` instead of propagating a parse failure.
    pub fn parse_body(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| serde_json::json!({ "error": self.body }))
    }
}

/// True when a failure payload tells us the session is gone and the host
/// environment has to reload. Strictly a boolean `"logout": true` field.
pub fn signals_session_invalidation(payload: &Value) -> bool {
    payload.get("logout").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_bodies_parse_through() {
        let failure = TransportFailure::new(r#"{"error":"conflict","code":409}"#).with_status(409);
        let payload = failure.parse_body();
        assert_eq!(payload["error"], "conflict");
        assert_eq!(payload["code"], 409);
    }

    #[test]
    fn malformed_bodies_degrade_to_a_wrapped_error() {
        let failure = TransportFailure::new("Internal Server Error");
        assert_eq!(
            failure.parse_body(),
            serde_json::json!({ "error": "Internal Server Error" })
        );
    }

    #[test]
    fn logout_flag_signals_session_invalidation() {
        let gone = TransportFailure::new(r#"{"error":"expired","logout":true}"#).parse_body();
        assert!(signals_session_invalidation(&gone));

        let fine = TransportFailure::new(r#"{"error":"expired"}"#).parse_body();
        assert!(!signals_session_invalidation(&fine));

        let off = TransportFailure::new(r#"{"logout":false}"#).parse_body();
        assert!(!signals_session_invalidation(&off));
    }
}
