//! Bounded-concurrency execution pool for hatched virtual clients (§4.4).
//!
//! Generalizes the teacher's `JoinSet`-of-workers idiom from
//! `engine/executor.rs`, but trades "one task per virtual client" for a
//! fixed-size worker pool pulling from a bounded queue: each worker takes one
//! client off the queue, runs exactly one `execute` iteration, and — unless
//! the client has been cancelled — puts it back on the queue for its next
//! iteration. This decouples the number of concurrently *running* iterations
//! (`threads`) from the number of *hatched* clients, and the bounded channel
//! capacity (`buffer_size`, required to be a power of two) caps how much
//! pending work can queue up between them.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::SwarmError;
use crate::prototype::{ExecutionContext, VirtualClient};
use crate::rate_limiter::RateLimiter;
use crate::stats::{Outcome, StatsHandle};

/// A client plus the one-time `initialize` flag; this is the unit of work
/// that travels through the bounded queue.
struct Unit {
    client: Box<dyn VirtualClient>,
    initialized: bool,
}

/// Validate that `buffer_size` is a power of two, per §4.4.
fn validate_buffer_size(buffer_size: usize) -> Result<(), SwarmError> {
    if buffer_size == 0 || (buffer_size & (buffer_size - 1)) != 0 {
        return Err(SwarmError::Config(format!(
            "buffer_size must be a power of two, got {buffer_size}"
        )));
    }
    Ok(())
}

/// The bounded pool itself. Construction fails if `buffer_size` is not a
/// power of two or `threads` is zero.
pub struct Scheduler {
    tx: mpsc::Sender<Unit>,
    rx_slot: std::sync::Mutex<Option<mpsc::Receiver<Unit>>>,
    threads: usize,
    buffer_size: usize,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,
    in_flight: Arc<AtomicU64>,
    workers: std::sync::Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(buffer_size: usize, threads: usize, max_rps: f64) -> Result<Self, SwarmError> {
        validate_buffer_size(buffer_size)?;
        if threads == 0 {
            return Err(SwarmError::Config("threads must be at least 1".to_string()));
        }
        let (tx, rx) = mpsc::channel(buffer_size);
        Ok(Self {
            tx,
            rx_slot: std::sync::Mutex::new(Some(rx)),
            threads,
            buffer_size,
            rate_limiter: RateLimiter::new(max_rps),
            cancel: CancellationToken::new(),
            in_flight: Arc::new(AtomicU64::new(0)),
            workers: std::sync::Mutex::new(None),
        })
    }

    /// Number of clients currently queued or mid-iteration.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// The maximum number of clients that can be concurrently live in this
    /// pool: `buffer_size` slots in the queue plus `threads` slots mid-
    /// iteration. Every hatched client occupies one of these slots for its
    /// entire lifetime (it re-queues itself after each iteration), so a
    /// hatch request for more clients than this would wedge the pool —
    /// workers blocked sending a full queue, the hatcher blocked submitting,
    /// nothing left to drain either side.
    pub fn max_concurrent_clients(&self) -> usize {
        self.buffer_size + self.threads
    }

    /// Start the fixed worker pool. Idempotent only in the sense that
    /// calling it twice would spawn a second pool reading from a channel
    /// whose receiver has already been taken — callers must call this
    /// exactly once per scheduler instance.
    pub fn start(&self, stats: StatsHandle) {
        let rx = self
            .rx_slot
            .lock()
            .expect("scheduler mutex poisoned")
            .take()
            .expect("Scheduler::start called more than once");
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut join_set = JoinSet::new();
        for _ in 0..self.threads {
            let rx = Arc::clone(&rx);
            let tx = self.tx.clone();
            let rate_limiter = self.rate_limiter.clone();
            let cancel = self.cancel.clone();
            let stats = stats.clone();
            let in_flight = Arc::clone(&self.in_flight);
            join_set.spawn(async move {
                worker_loop(rx, tx, rate_limiter, cancel, stats, in_flight).await;
            });
        }
        *self.workers.lock().expect("scheduler mutex poisoned") = Some(join_set);
    }

    /// Submit a freshly hatched client. Blocks (cooperatively) if the
    /// bounded queue is full — natural backpressure on spawn pacing.
    pub async fn submit(&self, client: Box<dyn VirtualClient>) -> Result<(), SwarmError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(Unit {
                client,
                initialized: false,
            })
            .await
            .map_err(|_| SwarmError::Internal("scheduler queue closed".to_string()))
    }

    /// Signal all workers to stop re-submitting clients after their current
    /// iteration; in-flight iterations are allowed to finish and dispose.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker pool to drain completely. Call after `stop()`.
    pub async fn dispose(&self) {
        let join_set = self.workers.lock().expect("scheduler mutex poisoned").take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
    }
}

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Unit>>>,
    tx: mpsc::Sender<Unit>,
    rate_limiter: RateLimiter,
    cancel: CancellationToken,
    stats: StatsHandle,
    in_flight: Arc<AtomicU64>,
) {
    let ctx = ExecutionContext {
        cancel: cancel.clone(),
        stats: stats.clone(),
    };
    loop {
        let mut unit = {
            let mut guard = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drain_queue(&mut guard, &ctx, &in_flight).await;
                    return;
                }
                maybe_unit = guard.recv() => {
                    match maybe_unit {
                        Some(unit) => unit,
                        None => return,
                    }
                }
            }
        };

        if !unit.initialized {
            unit.client.initialize(&ctx).await;
            unit.initialized = true;
        }

        if rate_limiter.is_enabled() {
            rate_limiter.acquire().await;
        }

        let outcome = AssertUnwindSafe(unit.client.execute(&ctx)).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = panic_message(&panic);
            stats.report(Outcome::Failure {
                endpoint_type: "panic".to_string(),
                name: "virtual_client".to_string(),
                response_time_ms: 0,
                error_message: message,
            });
        }

        if cancel.is_cancelled() {
            unit.client.dispose(&ctx).await;
            in_flight.fetch_sub(1, Ordering::Relaxed);
            let mut guard = rx.lock().await;
            drain_queue(&mut guard, &ctx, &in_flight).await;
            return;
        }

        if tx.send(unit).await.is_err() {
            in_flight.fetch_sub(1, Ordering::Relaxed);
            return;
        }
    }
}

/// Dispose every client still sitting in the queue without running another
/// iteration. Called once a worker observes cancellation, so that clients
/// which never got to execute again still get their `dispose()` hook.
async fn drain_queue(rx: &mut mpsc::Receiver<Unit>, ctx: &ExecutionContext, in_flight: &AtomicU64) {
    while let Ok(mut unit) = rx.try_recv() {
        unit.client.dispose(ctx).await;
        in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "virtual client task panicked".to_string()
    }
}
