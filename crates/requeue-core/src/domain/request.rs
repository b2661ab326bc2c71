//! Request snapshot: the persistable projection and its state machine.

use serde::{Deserialize, Serialize};

use super::ids::RequestId;
use super::operation::Operation;

/// Request lifecycle status.
///
/// Transitions:
/// - Idle -> Busy (dispatch)
/// - Busy -> Success (transport succeeded; removal follows immediately)
/// - Busy -> Error (transport failed; eligible again once backoff elapses)
/// - Error -> Busy (re-dispatch), or removal when the retry budget is spent
///
/// Error is not a blocking state: eligibility is decided by
/// `next_eligible_at`, not by the status itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Idle,
    Busy,
    Error,
    Success,
}

/// Free-form display metadata; never interpreted by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// The persistable projection of a queued request: serializable fields only.
/// The runtime projection (completion hooks on top of this snapshot) lives in
/// the live pool; see `store::CompletionHooks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub operation: Operation,
    pub status: RequestStatus,

    /// Last dispatch time, epoch milliseconds.
    pub last_attempt_at: i64,

    /// Time at or after which the request may be dispatched again.
    /// Zero means immediately eligible.
    pub next_eligible_at: i64,

    /// Count of failed completions. Never decreases.
    pub attempts: u32,

    /// Retry budget. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Last parsed failure payload, if any attempt has failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<serde_json::Value>,

    #[serde(default)]
    pub metadata: RequestMeta,
}

impl Request {
    pub fn new(
        id: RequestId,
        operation: Operation,
        now_ms: i64,
        max_attempts: Option<u32>,
        metadata: RequestMeta,
    ) -> Self {
        Self {
            id,
            operation,
            status: RequestStatus::Idle,
            last_attempt_at: now_ms,
            next_eligible_at: 0,
            attempts: 0,
            max_attempts,
            last_failure: None,
            metadata,
        }
    }

    pub fn is_read(&self) -> bool {
        self.operation.method.is_read()
    }

    /// Dispatch eligibility: not already in flight, and the backoff window
    /// (if any) has passed.
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        self.status != RequestStatus::Busy && now_ms >= self.next_eligible_at
    }

    /// True once the retry budget is spent; such a request is removed and
    /// never dispatched again.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_attempts, Some(max) if self.attempts > max)
    }

    /// Picked up for execution.
    pub fn mark_busy(&mut self, now_ms: i64) {
        self.status = RequestStatus::Busy;
        self.last_attempt_at = now_ms;
        self.next_eligible_at = 0;
    }

    /// Back to the starting state; used on recovery so interrupted requests
    /// become eligible again.
    pub fn mark_idle(&mut self) {
        self.status = RequestStatus::Idle;
        self.next_eligible_at = 0;
    }

    /// Completed successfully. Transient: removal follows immediately.
    pub fn mark_success(&mut self) {
        self.status = RequestStatus::Success;
    }

    /// A dispatch failed: record the payload, bump the attempt count, and
    /// push eligibility out to `next_eligible_at`.
    pub fn record_failure(
        &mut self,
        now_ms: i64,
        failure: serde_json::Value,
        next_eligible_at: i64,
    ) {
        self.status = RequestStatus::Error;
        self.last_attempt_at = now_ms;
        self.attempts += 1;
        self.last_failure = Some(failure);
        self.next_eligible_at = next_eligible_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::Method;

    fn sample() -> Request {
        Request::new(
            RequestId::parse("00112233-4455-6677-8899-aabbccddeeff").unwrap(),
            Operation::new(Method::Create, "/api/items"),
            1_000,
            None,
            RequestMeta::default(),
        )
    }

    #[test]
    fn status_serializes_screaming() {
        for (status, name) in [
            (RequestStatus::Idle, "\"IDLE\""),
            (RequestStatus::Busy, "\"BUSY\""),
            (RequestStatus::Error, "\"ERROR\""),
            (RequestStatus::Success, "\"SUCCESS\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), name);
        }
    }

    #[test]
    fn new_requests_are_immediately_eligible() {
        let request = sample();
        assert_eq!(request.status, RequestStatus::Idle);
        assert_eq!(request.next_eligible_at, 0);
        assert!(request.is_eligible(0));
    }

    #[test]
    fn busy_requests_are_never_eligible() {
        let mut request = sample();
        request.mark_busy(2_000);
        assert_eq!(request.next_eligible_at, 0);
        assert!(!request.is_eligible(i64::MAX));
    }

    #[test]
    fn failure_delays_eligibility_until_the_window_passes() {
        let mut request = sample();
        request.mark_busy(2_000);
        request.record_failure(3_000, serde_json::json!({"error": "boom"}), 4_000);
        assert_eq!(request.status, RequestStatus::Error);
        assert_eq!(request.attempts, 1);
        assert!(!request.is_eligible(3_999));
        assert!(request.is_eligible(4_000));
    }

    #[test]
    fn exhaustion_requires_attempts_beyond_the_budget() {
        let mut request = sample();
        request.max_attempts = Some(2);
        request.attempts = 2;
        assert!(!request.is_exhausted());
        request.attempts = 3;
        assert!(request.is_exhausted());

        // Unlimited budget never exhausts.
        request.max_attempts = None;
        request.attempts = u32::MAX;
        assert!(!request.is_exhausted());
    }
}
