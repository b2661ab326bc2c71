//! Operations: the unit of transportable work.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Header carrying the request identifier (doubles as an idempotency key).
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

/// Header carrying the submission time in epoch seconds.
pub const HEADER_FIRST_REQUESTED: &str = "X-First-Requested";

/// What kind of work a request performs. Transports map this onto HTTP verbs
/// via [`Method::http_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Update,
    Patch,
    Delete,
    Read,
}

impl Method {
    pub fn http_name(self) -> &'static str {
        match self {
            Method::Create => "POST",
            Method::Update => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Read => "GET",
        }
    }

    /// Reads are dispatched eagerly instead of queued, and most lifecycle
    /// events stay silent for them.
    pub fn is_read(self) -> bool {
        matches!(self, Method::Read)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.http_name())
    }
}

/// Method + target + payload + headers. Immutable once submitted, except for
/// the id and creation-time headers the queue adds on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub method: Method,
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Operation {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            payload: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
