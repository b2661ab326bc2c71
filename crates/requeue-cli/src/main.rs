use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::time::{Duration, sleep};

use requeue_core::{
    EventKind, Method, Operation, RetryQueue, SubmitOptions, Transport, TransportFailure,
};

/// A transport that fails the first N attempts, then succeeds.
struct FlakyTransport {
    remaining_failures: AtomicU32,
}

impl FlakyTransport {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn execute(
        &self,
        operation: &Operation,
    ) -> Result<serde_json::Value, TransportFailure> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(
                TransportFailure::new(format!(r#"{{"error":"intentional failure (left={left})"}}"#))
                    .with_status(503),
            );
        }

        println!(
            "server accepted {} {}",
            operation.method.http_name(),
            operation.target
        );
        Ok(serde_json::json!({ "ok": true }))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // (A) a queue over a transport that fails twice before succeeding
    let queue = RetryQueue::builder(Arc::new(FlakyTransport::new(2))).build();

    for kind in [
        EventKind::Added,
        EventKind::Busy,
        EventKind::Error,
        EventKind::Success,
        EventKind::Removed,
    ] {
        queue.subscribe(kind, move |request| {
            println!(
                "event: {kind:?} id={} attempts={} status={:?}",
                request.id, request.attempts, request.status
            );
        });
    }

    // (B) submit one mutating operation with a small retry budget
    let request = queue
        .submit(
            Operation::new(Method::Create, "/api/items")
                .with_payload(serde_json::json!({ "name": "requeue" })),
            SubmitOptions::new()
                .title("create item")
                .max_attempts(5)
                .on_success(|result| println!("success hook: {result}"))
                .on_error(|payload| println!("error hook: {payload}")),
        )
        .expect("submit");
    println!("submitted request: {}", request.id);

    // (C) poll until the queue drains (success removes the request)
    loop {
        if queue.get(&request.id).is_none() {
            println!("request settled, queue drained");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    queue.shutdown_and_join().await;
}
