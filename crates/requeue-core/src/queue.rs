//! The retry queue: submission, dispatch, settlement, and the timer loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::{
    HEADER_FIRST_REQUESTED, HEADER_REQUEST_ID, Operation, QueueError, Request, RequestId,
    RequestMeta, RequestStatus, TransportFailure, signals_session_invalidation,
};
use crate::events::{EventKind, Notifier};
use crate::ports::{
    Clock, IdGenerator, KeyValueStore, MemoryStore, NoopSessionHandler, RandomIdGenerator,
    SessionHandler, SystemClock, Transport, probe,
};
use crate::scheduler::{BackoffPolicy, HOUSEKEEPING_DELAY, Scheduler};
use crate::store::{CompletionHooks, DualPoolStore};

/// Default key prefix for the persisted pool.
pub const DEFAULT_KEY_PREFIX: &str = "requeue.";

/// Per-submission options: display metadata, retry budget, completion hooks.
#[derive(Default)]
pub struct SubmitOptions {
    pub title: String,
    pub description: String,

    /// Retry budget; `None` means unlimited.
    pub max_attempts: Option<u32>,

    pub hooks: CompletionHooks,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn on_success(
        mut self,
        hook: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&serde_json::Value) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }
}

pub struct QueueBuilder {
    transport: Arc<dyn Transport>,
    kv: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    id_gen: Arc<dyn IdGenerator>,
    session: Arc<dyn SessionHandler>,
    backoff: BackoffPolicy,
    key_prefix: String,
}

impl QueueBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            kv: None,
            clock: Arc::new(SystemClock),
            id_gen: Arc::new(RandomIdGenerator),
            session: Arc::new(NoopSessionHandler),
            backoff: BackoffPolicy::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn kv_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn session_handler(mut self, session: Arc<dyn SessionHandler>) -> Self {
        self.session = session;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build the queue: probe storage (degrading to memory-only when the
    /// persisted store is unusable), recover requests left behind by a
    /// previous process, start the timer loop, and run once. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> RetryQueue {
        let kv = match self.kv {
            Some(kv) if probe(kv.as_ref(), &self.key_prefix) => kv,
            Some(_) => {
                warn!("persisted store rejected the startup probe, degrading to memory-only");
                Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>
            }
            None => Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
        };

        let core = Arc::new(QueueCore {
            store: Mutex::new(DualPoolStore::new(kv, self.key_prefix)),
            notifier: Notifier::new(),
            scheduler: Scheduler::new(),
            clock: self.clock,
            transport: self.transport,
            session: self.session,
            id_gen: self.id_gen,
            backoff: self.backoff,
        });

        core.recover();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = tokio::spawn(timer_loop(Arc::clone(&core), shutdown_rx));

        let queue = RetryQueue {
            core,
            shutdown_tx,
            timer,
        };
        queue.run_now();
        queue
    }
}

/// Durable client-side retry queue.
///
/// Accepts mutating operations (and eagerly-dispatched reads), executes them
/// through the injected [`Transport`], and persists queued work so
/// non-idempotent operations survive failures and process restarts instead
/// of being silently lost.
pub struct RetryQueue {
    core: Arc<QueueCore>,
    shutdown_tx: watch::Sender<bool>,
    timer: JoinHandle<()>,
}

impl RetryQueue {
    pub fn builder(transport: Arc<dyn Transport>) -> QueueBuilder {
        QueueBuilder::new(transport)
    }

    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&Request) + Send + Sync + 'static) {
        self.core.notifier.subscribe(kind, handler);
    }

    /// Enqueue an operation. Mutating operations join the queue (`Added`
    /// fires, processing starts); reads are dispatched immediately and skip
    /// the queue events.
    pub fn submit(
        &self,
        operation: Operation,
        options: SubmitOptions,
    ) -> Result<Request, QueueError> {
        self.core.submit(operation, options)
    }

    /// Resolve a request snapshot from either pool.
    pub fn get(&self, id: &RequestId) -> Option<Request> {
        self.core.lock_store().get(id).map(|(request, _)| request)
    }

    /// Visit every request in the union of both pools. Live entries whose
    /// persisted counterpart is gone are pruned first; unreadable snapshots
    /// are skipped silently.
    pub fn for_each(&self, mut visit: impl FnMut(&Request)) {
        for request in self.core.snapshot() {
            visit(&request);
        }
    }

    pub fn count_status(&self, status: RequestStatus) -> usize {
        self.core
            .snapshot()
            .iter()
            .filter(|request| request.status == status)
            .count()
    }

    /// Force a request eligible and dispatch it right away. Returns whether
    /// an attempt actually started.
    pub fn reload(&self, id: &RequestId) -> bool {
        self.core.reload(id)
    }

    /// Remove a request. `NotFound` when the identifier resolves in neither
    /// pool; a silent no-op while the request is BUSY.
    pub fn remove(&self, id: &RequestId) -> Result<(), QueueError> {
        self.core.remove(id)
    }

    /// Attempt dispatch of every eligible request, then arm the housekeeping
    /// recheck if anything was dispatched. Returns the dispatch count.
    pub fn run_now(&self) -> usize {
        self.core.run_now()
    }

    /// One dispatch pass without touching the housekeeping recheck.
    pub fn execute_all(&self) -> usize {
        self.core.execute_all()
    }

    /// Stop the timer loop. In-flight transport attempts are not cancelled;
    /// their settlements still apply.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.timer.await;
    }
}

struct QueueCore {
    store: Mutex<DualPoolStore>,
    notifier: Notifier,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionHandler>,
    id_gen: Arc<dyn IdGenerator>,
    backoff: BackoffPolicy,
}

impl QueueCore {
    fn lock_store(&self) -> MutexGuard<'_, DualPoolStore> {
        // The lock is never held across an await or an event emission.
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set every persisted request back to IDLE. Requests left BUSY or ERROR
    /// by a previous process become immediately eligible again.
    fn recover(&self) {
        let mut store = self.lock_store();
        for id in store.ids() {
            if let Some((mut request, _)) = store.get(&id) {
                request.mark_idle();
                if let Err(e) = store.put(&request) {
                    error!(id = %id, error = %e, "failed to persist recovered request");
                }
            }
        }
    }

    /// Resolved snapshots of every request in either pool, pruning live
    /// orphans along the way. Computed under the store lock, visited outside
    /// it.
    fn snapshot(&self) -> Vec<Request> {
        let mut store = self.lock_store();
        store
            .ids()
            .into_iter()
            .filter_map(|id| store.get(&id).map(|(request, _)| request))
            .collect()
    }

    fn submit(
        self: &Arc<Self>,
        mut operation: Operation,
        options: SubmitOptions,
    ) -> Result<Request, QueueError> {
        if operation.target.is_empty() {
            return Err(QueueError::Validation(
                "operation target must not be empty".to_string(),
            ));
        }

        let id = self.id_gen.generate();
        let now = self.clock.now_millis();
        operation
            .headers
            .insert(HEADER_REQUEST_ID.to_string(), id.to_string());
        operation
            .headers
            .insert(HEADER_FIRST_REQUESTED.to_string(), (now / 1000).to_string());

        let request = Request::new(
            id,
            operation,
            now,
            options.max_attempts,
            RequestMeta {
                title: options.title,
                description: options.description,
            },
        );

        self.lock_store().insert(request.clone(), options.hooks)?;

        if request.is_read() {
            // Reads are not queued work: no `Added`, straight to dispatch.
            self.dispatch(&request.id);
        } else {
            self.notifier.emit(EventKind::Added, &request);
            self.run_now();
        }
        Ok(request)
    }

    /// One pass over every request, then — if anything was dispatched and no
    /// recheck is pending — arm the 2s housekeeping recheck so completions
    /// that race with this run still converge.
    fn run_now(self: &Arc<Self>) -> usize {
        let dispatched = self.execute_all();
        if dispatched > 0 {
            let fire_at = self.clock.now_millis() + HOUSEKEEPING_DELAY.as_millis() as i64;
            self.scheduler.schedule_recheck(fire_at);
        }
        dispatched
    }

    fn execute_all(self: &Arc<Self>) -> usize {
        let mut executed = 0;
        for request in self.snapshot() {
            if self.dispatch(&request.id) {
                executed += 1;
            }
        }
        executed
    }

    /// Attempt one dispatch. Eligibility: resolvable, not BUSY, and past its
    /// eligibility window. Returns true when a transport attempt started.
    fn dispatch(self: &Arc<Self>, id: &RequestId) -> bool {
        let now = self.clock.now_millis();
        let (request, hooks) = {
            let mut store = self.lock_store();
            let Some((mut request, hooks)) = store.get(id) else {
                return false;
            };
            if !request.is_eligible(now) {
                return false;
            }
            request.mark_busy(now);
            if let Err(e) = store.put(&request) {
                // Storage faults are not transport faults: execution goes
                // ahead with degraded durability.
                error!(id = %id, error = %e, "failed to persist BUSY transition");
            }
            (request, hooks)
        };

        if !request.is_read() {
            self.notifier.emit(EventKind::Busy, &request);
        }
        self.notifier.emit(EventKind::Execute, &request);

        debug!(id = %request.id, attempts = request.attempts, "dispatching");
        let core = Arc::clone(self);
        tokio::spawn(async move {
            match core.transport.execute(&request.operation).await {
                Ok(result) => core.settle_success(&request.id, &hooks, &result),
                Err(failure) => core.settle_failure(&request.id, &hooks, failure),
            }
        });
        true
    }

    fn settle_success(
        self: &Arc<Self>,
        id: &RequestId,
        hooks: &CompletionHooks,
        result: &serde_json::Value,
    ) {
        if let Some(on_success) = &hooks.on_success {
            on_success(result);
        }

        let request = {
            let mut store = self.lock_store();
            let Some((mut request, _)) = store.get(id) else {
                return;
            };
            request.mark_success();
            if let Err(e) = store.put(&request) {
                error!(id = %id, error = %e, "failed to persist SUCCESS transition");
            }
            request
        };

        if !request.is_read() {
            self.notifier.emit(EventKind::Success, &request);
        }
        // SUCCESS is transient: the request leaves both pools right away.
        if let Err(e) = self.remove(id) {
            warn!(id = %id, error = %e, "settled request vanished before removal");
        }
    }

    fn settle_failure(
        self: &Arc<Self>,
        id: &RequestId,
        hooks: &CompletionHooks,
        failure: TransportFailure,
    ) {
        let payload = failure.parse_body();
        if let Some(on_error) = &hooks.on_error {
            on_error(&payload);
        }
        let logout = signals_session_invalidation(&payload);

        let resolved = {
            let mut store = self.lock_store();
            store.get(id).map(|(mut request, _)| {
                let now = self.clock.now_millis();
                let delay = self.backoff.delay(request.attempts + 1);
                request.record_failure(now, payload.clone(), now + delay.as_millis() as i64);
                if let Err(e) = store.put(&request) {
                    error!(id = %id, error = %e, "failed to persist failed attempt");
                }
                request
            })
        };
        let Some(request) = resolved else {
            return;
        };

        if request.is_exhausted() {
            debug!(id = %id, attempts = request.attempts, "retry budget exhausted, dropping");
            // Status already left BUSY, so the removal guard does not apply.
            if let Err(e) = self.remove(id) {
                warn!(id = %id, error = %e, "exhausted request vanished before removal");
            }
        } else {
            self.scheduler
                .schedule_retry(request.next_eligible_at, id.clone());
        }

        // `Error` fires regardless of outcome, reads included.
        self.notifier.emit(EventKind::Error, &request);
        if logout {
            self.session.session_invalidated();
        }
    }

    /// Remove a request, always re-resolving the canonical copy from the
    /// store first — a caller-held request may be stale. BUSY requests are
    /// protected: removal is a silent no-op while an attempt is in flight.
    fn remove(&self, id: &RequestId) -> Result<(), QueueError> {
        let removed = {
            let mut store = self.lock_store();
            let Some((request, _)) = store.get(id) else {
                return Err(QueueError::NotFound(id.clone()));
            };
            if request.status == RequestStatus::Busy {
                return Ok(());
            }
            store.remove_entry(id);
            request
        };
        if !removed.is_read() {
            self.notifier.emit(EventKind::Removed, &removed);
        }
        Ok(())
    }

    fn reload(self: &Arc<Self>, id: &RequestId) -> bool {
        {
            let mut store = self.lock_store();
            let Some((mut request, _)) = store.get(id) else {
                return false;
            };
            request.next_eligible_at = 0;
            if let Err(e) = store.put(&request) {
                error!(id = %id, error = %e, "failed to persist forced eligibility");
            }
        }
        self.dispatch(id)
    }
}

/// The single timer loop: drains due wakeups, runs the queue, then sleeps
/// until the next fire time or a newly-scheduled wakeup, whichever comes
/// first. Backoff wakeups and the housekeeping recheck share this loop but
/// never merge their deadlines.
async fn timer_loop(core: Arc<QueueCore>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let now = core.clock.now_millis();
        let due = core.scheduler.pop_due(now);
        if !due.is_empty() {
            debug!(fired = due.len(), "timer wakeup");
            core.run_now();
        }

        let wait = core
            .scheduler
            .next_fire_at()
            .map(|at| Duration::from_millis((at - core.clock.now_millis()).max(0) as u64));

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // Queue handle dropped without an explicit shutdown.
                    break;
                }
            }
            _ = core.scheduler.notified() => {}
            _ = async {
                match wait {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
    }
}
