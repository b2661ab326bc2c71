use thiserror::Error;

use super::ids::RequestId;

/// Errors surfaced to callers of the queue.
///
/// Transport failures are deliberately not a variant here: they are recorded
/// on the request and retried per the backoff policy, never bubbled up as a
/// caller error.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed input passed to submit/store/remove. Not retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// `remove` on an identifier that resolves in neither pool.
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// Persisted-store write failure (quota exhaustion and the like).
    /// Fatal: it signals an unrecoverable environment condition, not a
    /// transient one.
    #[error("persisted store failure: {0}")]
    Storage(String),
}
