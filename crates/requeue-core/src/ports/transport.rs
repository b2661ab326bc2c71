//! Transport port: executes operations against the outside world.

use async_trait::async_trait;

use crate::domain::{Operation, TransportFailure};

/// Starts one asynchronous attempt for an operation.
///
/// The single `Result` stands in for a pair of completion continuations:
/// exactly one of success or failure, exactly once per call. The queue
/// enforces no timeout; a transport that never returns leaves its request
/// BUSY indefinitely.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, operation: &Operation)
    -> Result<serde_json::Value, TransportFailure>;
}
