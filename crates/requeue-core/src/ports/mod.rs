//! Ports: the queue's injected capabilities.
//!
//! Each trait is a seam to the host environment (transport, persisted
//! storage, time, randomness, session control), so tests swap in
//! deterministic fakes and storage-less environments still work.

pub mod clock;
pub mod id_generator;
pub mod kv_store;
pub mod session;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::id_generator::{IdGenerator, RandomIdGenerator};
pub use self::kv_store::{KeyValueStore, MemoryStore, probe};
pub use self::session::{NoopSessionHandler, SessionHandler};
pub use self::transport::Transport;
