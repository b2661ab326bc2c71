//! requeue-core
//!
//! A durable client-side retry queue. Mutating operations are persisted,
//! executed through an injected transport, and retried on a fixed backoff
//! ladder until they succeed, exhaust their budget, or are removed.
//!
//! # Module layout
//! - **domain**: the model (ids, operations, requests, failures, errors)
//! - **ports**: seams for the host environment (Clock, IdGenerator,
//!   KeyValueStore, Transport, SessionHandler)
//! - **events**: lifecycle event subscription
//! - **store**: the dual-pool request store (live + persisted)
//! - **scheduler**: backoff policy and wakeup bookkeeping
//! - **queue**: the [`queue::RetryQueue`] itself

pub mod domain;
pub mod events;
pub mod ports;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use domain::{
    Method, Operation, QueueError, Request, RequestId, RequestMeta, RequestStatus,
    TransportFailure,
};
pub use events::EventKind;
pub use ports::{Clock, IdGenerator, KeyValueStore, MemoryStore, SessionHandler, Transport};
pub use queue::{DEFAULT_KEY_PREFIX, QueueBuilder, RetryQueue, SubmitOptions};
pub use scheduler::BackoffPolicy;
