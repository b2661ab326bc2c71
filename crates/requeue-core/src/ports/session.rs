//! Session port: host hook for session-invalidation failures.

/// Invoked when a failure payload carries `"logout": true`. The host
/// typically reloads its whole environment; this is an escape hatch outside
/// normal queue semantics.
pub trait SessionHandler: Send + Sync {
    fn session_invalidated(&self);
}

/// Default handler: ignore the signal.
pub struct NoopSessionHandler;

impl SessionHandler for NoopSessionHandler {
    fn session_invalidated(&self) {}
}
