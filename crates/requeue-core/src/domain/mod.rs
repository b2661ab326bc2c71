//! Domain model (identifiers, operations, request snapshots, failures).

pub mod errors;
pub mod failure;
pub mod ids;
pub mod operation;
pub mod request;

pub use errors::QueueError;
pub use failure::{TransportFailure, signals_session_invalidation};
pub use ids::RequestId;
pub use operation::{HEADER_FIRST_REQUESTED, HEADER_REQUEST_ID, Method, Operation};
pub use request::{Request, RequestMeta, RequestStatus};
