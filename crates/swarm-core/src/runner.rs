//! The worker state machine (§4.7): IDLE → READY → HATCHING → RUNNING →
//! STOPPED(→READY), driven by frames read from a [`Transport`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::SwarmError;
use crate::heartbeat::spawn_heartbeat;
use crate::message::{Frame, FrameType};
use crate::node_id::build_node_id;
use crate::prototype::PrototypeSet;
use crate::rate_limiter::RateLimiter;
use crate::scheduler::Scheduler;
use crate::stats::StatsAggregator;
use crate::transport::Transport;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Idle = 0,
    Ready = 1,
    Hatching = 2,
    Running = 3,
    Stopped = 4,
}

impl From<u8> for RunnerState {
    fn from(value: u8) -> Self {
        match value {
            1 => RunnerState::Ready,
            2 => RunnerState::Hatching,
            3 => RunnerState::Running,
            4 => RunnerState::Stopped,
            _ => RunnerState::Idle,
        }
    }
}

/// What drove a frame out of `handle_frame` and whether the control loop
/// should stop reading frames.
enum FrameOutcome {
    Continue,
    Quit,
    IllegalTransition(String),
}

/// Await either a Ctrl-C or (on unix) a SIGTERM. This is the "process
/// shutdown signal" event in the §4.7 transition table.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Ties transport, scheduler, stats, and heartbeat together into the
/// worker's control loop.
pub struct Runner {
    config: WorkerConfig,
    node_id: String,
    transport: Arc<dyn Transport>,
    prototypes: PrototypeSet,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
    stats: StatsAggregator,
    state: AtomicU8,
    actual_client_count: Arc<AtomicU64>,
    disposed: AtomicBool,
    /// Set while a hatch is in progress so a concurrently-arriving `stop`
    /// frame can interrupt it (S4: "stop mid-hatch"). Hatching runs on its
    /// own background task precisely so the frame loop stays free to read
    /// that `stop` frame while spawning is still paced by the rate limiter.
    hatch_cancel: tokio::sync::Mutex<Option<CancellationToken>>,
    hatch_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Serializes every outbound frame. Individual sends (`send_frame`) each
    /// take it for their own duration; `handle_stop` holds it across both of
    /// its sends so `client_stopped`/`client_ready` reach the coordinator
    /// back-to-back with no `stats`/`hatch_complete` interleaved (§5
    /// invariant 6) regardless of what the flush loop's detached task is
    /// doing concurrently.
    send_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Runner {
    pub fn new(config: WorkerConfig, transport: Arc<dyn Transport>, prototypes: PrototypeSet) -> Self {
        let node_id = build_node_id(config.random_seed);
        Self {
            config,
            node_id,
            transport,
            prototypes,
            scheduler: tokio::sync::Mutex::new(None),
            stats: StatsAggregator::new(),
            state: AtomicU8::new(RunnerState::Idle as u8),
            actual_client_count: Arc::new(AtomicU64::new(0)),
            disposed: AtomicBool::new(false),
            hatch_cancel: tokio::sync::Mutex::new(None),
            hatch_task: tokio::sync::Mutex::new(None),
            send_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Send a single frame, serialized against every other `send_frame` call
    /// and against `handle_stop`'s combined `client_stopped`+`client_ready`
    /// handshake.
    async fn send_frame(&self, frame: Frame) -> Result<(), SwarmError> {
        let _guard = self.send_lock.lock().await;
        self.transport.send(frame).await
    }

    pub fn state(&self) -> RunnerState {
        RunnerState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn actual_client_count(&self) -> u64 {
        self.actual_client_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: RunnerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Drive the worker until a `quit` frame arrives, a shutdown signal is
    /// received, or the transport is permanently disposed. Returns `Err` only
    /// for an illegal state transition (§7) — every other exit path is a
    /// clean shutdown and maps to process exit code 0 at the call site.
    ///
    /// Takes `&Arc<Self>` (rather than plain `&self`) because hatching runs
    /// as a detached background task (see `hatch_cancel`/`hatch_task`) that
    /// needs its own owned handle back into the runner.
    pub async fn run(self: &Arc<Self>) -> Result<(), SwarmError> {
        self.transport.initialize().await?;
        self.send_frame(Frame::client_ready(&self.node_id)).await?;
        self.set_state(RunnerState::Ready);

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_handle = spawn_heartbeat(
            Arc::clone(&self.transport),
            self.node_id.clone(),
            HEARTBEAT_INTERVAL,
            heartbeat_cancel.clone(),
        );

        // Re-announce readiness on every reconnect (§7 Recovery: "on
        // reconnect it re-invokes on_connected, which re-announces
        // readiness"). The initial `true` we already acted on above is
        // consumed so this only fires on genuine transitions.
        let reconnect_cancel = CancellationToken::new();
        let reconnect_handle = {
            let mut connected_rx = self.transport.connected();
            connected_rx.borrow_and_update();
            let transport = Arc::clone(&self.transport);
            let node_id = self.node_id.clone();
            let cancel = reconnect_cancel.clone();
            let send_lock = Arc::clone(&self.send_lock);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = connected_rx.changed() => {
                            if result.is_err() {
                                return;
                            }
                            if *connected_rx.borrow() {
                                let _guard = send_lock.lock().await;
                                let _ = transport.send(Frame::client_ready(&node_id)).await;
                            }
                        }
                        _ = cancel.cancelled() => return,
                    }
                }
            })
        };

        let stats_cancel = CancellationToken::new();
        let flush_transport = Arc::clone(&self.transport);
        let flush_node_id = self.node_id.clone();
        let flush_counter = Arc::clone(&self.actual_client_count);
        let flush_send_lock = Arc::clone(&self.send_lock);
        let flush_handle = self.stats.spawn_flush_loop(
            self.config.stat_interval,
            stats_cancel.clone(),
            move |mut snapshot| {
                snapshot.user_count = flush_counter.load(Ordering::Relaxed);
                let transport = Arc::clone(&flush_transport);
                let node_id = flush_node_id.clone();
                let send_lock = Arc::clone(&flush_send_lock);
                tokio::spawn(async move {
                    let data = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
                    // Hold the same lock `handle_stop` uses for its
                    // client_stopped/client_ready pair, so this send either
                    // completes entirely before that handshake starts or
                    // waits entirely until it finishes.
                    let _guard = send_lock.lock().await;
                    let _ = transport.send(Frame::stats(&node_id, data)).await;
                });
            },
        );

        let mut illegal_transition = None;
        loop {
            tokio::select! {
                frame = self.transport.recv() => {
                    match frame {
                        Some(frame) => match self.handle_frame(frame).await {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Quit => break,
                            FrameOutcome::IllegalTransition(reason) => {
                                illegal_transition = Some(reason);
                                break;
                            }
                        },
                        None => break,
                    }
                }
                _ = wait_for_shutdown_signal() => {
                    tracing::info!(node_id = %self.node_id, "shutdown signal received");
                    break;
                }
            }
        }

        heartbeat_cancel.cancel();
        let _ = heartbeat_handle.await;
        reconnect_cancel.cancel();
        let _ = reconnect_handle.await;
        stats_cancel.cancel();
        let _ = flush_handle.await;

        self.teardown().await;

        match illegal_transition {
            Some(reason) => Err(SwarmError::IllegalTransition(reason)),
            None => Ok(()),
        }
    }

    /// The §4.7 dispose procedure: if already disposed, return; otherwise
    /// send a `quit` frame, set STOPPED, dispose any in-progress hatch, then
    /// the scheduler (which disposes every in-flight virtual client), then
    /// the transport. This is the single teardown path for every exit
    /// trigger — inbound coordinator `quit`, a process shutdown signal, and
    /// an illegal state transition all fall through to it, which is why it
    /// always announces `quit` rather than only on the signal-triggered row.
    async fn teardown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.send_frame(Frame::quit(&self.node_id)).await.is_err() {
            tracing::warn!("failed to send quit frame during shutdown");
        }
        self.set_state(RunnerState::Stopped);
        if let Some(cancel) = self.hatch_cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.hatch_task.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
            scheduler.dispose().await;
        }
        self.transport.dispose().await;
    }

    /// Returns the loop-control outcome for one inbound frame.
    async fn handle_frame(self: &Arc<Self>, frame: Frame) -> FrameOutcome {
        match frame.frame_type {
            FrameType::Hatch => self.handle_hatch(&frame).await,
            FrameType::Stop => {
                self.handle_stop().await;
                FrameOutcome::Continue
            }
            FrameType::Quit => {
                tracing::info!(node_id = %self.node_id, "quit received");
                FrameOutcome::Quit
            }
            other => {
                tracing::warn!(?other, "ignoring unexpected inbound frame type");
                FrameOutcome::Continue
            }
        }
    }

    /// Validate and kick off a hatch. The actual pacing/spawn loop runs on a
    /// detached task (`run_hatch`) so this returns as soon as the task is
    /// spawned, leaving the frame loop free to observe a `stop` arriving
    /// mid-hatch.
    async fn handle_hatch(self: &Arc<Self>, frame: &Frame) -> FrameOutcome {
        let params = match frame.hatch_params() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed hatch frame");
                return FrameOutcome::Continue;
            }
        };

        let current = self.state();
        match current {
            RunnerState::Ready | RunnerState::Stopped => {}
            RunnerState::Hatching | RunnerState::Running => {
                let reason = format!("hatch frame received while {current:?}");
                tracing::error!(%reason, "illegal state transition");
                return FrameOutcome::IllegalTransition(reason);
            }
            RunnerState::Idle => {
                tracing::warn!("hatch frame received before the worker announced readiness, ignoring");
                return FrameOutcome::Continue;
            }
        }
        if self.prototypes.is_empty() {
            tracing::warn!("hatch requested but no prototypes are registered");
            return FrameOutcome::Continue;
        }
        // Every hatched client re-queues itself after each iteration for as
        // long as it lives, permanently occupying one queue/worker slot.
        // Requesting more clients than the pool can hold would wedge it:
        // workers blocked sending into a full queue, this hatch blocked
        // submitting, nothing left to drain either side. Treated like any
        // other malformed/unsatisfiable hatch request (§7): logged and
        // ignored, leaving the runner's state untouched.
        let max_supported = self.config.buffer_size + self.config.threads;
        if params.num_clients as usize > max_supported {
            tracing::error!(
                requested = params.num_clients,
                max_supported,
                "hatch request exceeds buffer_size + threads, ignoring"
            );
            return FrameOutcome::Continue;
        }

        self.stats.clear_all();
        self.set_state(RunnerState::Hatching);
        if self.send_frame(Frame::hatching(&self.node_id)).await.is_err() {
            tracing::error!("failed to announce hatching, continuing anyway");
        }

        let cancel = CancellationToken::new();
        *self.hatch_cancel.lock().await = Some(cancel.clone());

        let runner = Arc::clone(self);
        let hatch_rate = params.hatch_rate;
        let num_clients = params.num_clients;
        let handle = tokio::spawn(async move {
            runner.run_hatch(num_clients, hatch_rate, cancel).await;
        });
        *self.hatch_task.lock().await = Some(handle);

        FrameOutcome::Continue
    }

    /// Spawning procedure (§4.7): allocate `num_clients` across registered
    /// prototypes by weight, pace spawns through `hatch_rate`, and submit
    /// each clone to a fresh scheduler. Aborts early if `cancel` fires
    /// (a `stop` arrived) without transitioning to RUNNING or announcing
    /// `hatch_complete` — `handle_stop` takes over the teardown instead.
    async fn run_hatch(self: Arc<Self>, num_clients: u64, hatch_rate: f64, cancel: CancellationToken) {
        let scheduler = Scheduler::new(self.config.buffer_size, self.config.threads, self.config.max_rps)
            .expect("buffer_size/threads validated by WorkerConfig::new");
        scheduler.start(self.stats.clone());

        let allocation = self.prototypes.allocate(num_clients);
        let hatch_limiter = RateLimiter::new(hatch_rate);
        let mut spawned = 0u64;
        'allocation: for (idx, count) in allocation {
            let Some(prototype) = self.prototypes.iter().nth(idx) else {
                continue;
            };
            for _ in 0..count {
                if cancel.is_cancelled() {
                    break 'allocation;
                }
                if hatch_limiter.is_enabled() {
                    tokio::select! {
                        _ = hatch_limiter.acquire() => {}
                        _ = cancel.cancelled() => break 'allocation,
                    }
                }
                if cancel.is_cancelled() {
                    break 'allocation;
                }
                let client = prototype.spawn();
                if scheduler.submit(client).await.is_err() {
                    tracing::error!("scheduler queue closed mid-hatch");
                    break 'allocation;
                }
                spawned += 1;
                self.actual_client_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        *self.scheduler.lock().await = Some(scheduler);

        if cancel.is_cancelled() {
            tracing::info!(spawned, "hatching aborted by a stop frame");
            return;
        }

        self.set_state(RunnerState::Running);
        if self
            .send_frame(Frame::hatch_complete(&self.node_id, spawned))
            .await
            .is_err()
        {
            tracing::error!("failed to announce hatch_complete");
        }
    }

    async fn handle_stop(&self) {
        let current = self.state();
        if current != RunnerState::Hatching && current != RunnerState::Running {
            tracing::warn!(?current, "ignoring stop frame in unexpected state");
            return;
        }

        if current == RunnerState::Hatching {
            if let Some(cancel) = self.hatch_cancel.lock().await.take() {
                cancel.cancel();
            }
            if let Some(handle) = self.hatch_task.lock().await.take() {
                let _ = handle.await;
            }
        }

        self.set_state(RunnerState::Stopped);
        if let Some(scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop();
            scheduler.dispose().await;
        }
        self.actual_client_count.store(0, Ordering::Relaxed);
        {
            // Held across both sends so no concurrently-flushed `stats`
            // frame (or anything else routed through `send_frame`) can land
            // between `client_stopped` and `client_ready` (§5 invariant 6).
            let _guard = self.send_lock.lock().await;
            if self.transport.send(Frame::client_stopped(&self.node_id)).await.is_err() {
                tracing::error!("failed to announce client_stopped");
            }
            if self.transport.send(Frame::client_ready(&self.node_id)).await.is_err() {
                tracing::error!("failed to announce client_ready after stop");
            }
        }
        self.set_state(RunnerState::Ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::{BoxFuture, ExecutionContext, Prototype, VirtualClient};
    use crate::stats::Outcome;
    use crate::transport::mock::MockTransport;

    struct NoopClient;

    impl VirtualClient for NoopClient {
        fn initialize<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
        fn execute<'a>(&'a mut self, ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                ctx.stats.report(Outcome::Success {
                    endpoint_type: "GET".into(),
                    name: "/x".into(),
                    response_time_ms: 1,
                    response_length_bytes: 1,
                });
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
        }
        fn dispose<'a>(&'a mut self, _ctx: &'a ExecutionContext) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    struct NamedPrototype {
        name: String,
        weight: f64,
    }

    impl Prototype for NamedPrototype {
        fn name(&self) -> &str {
            &self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        fn spawn(&self) -> Box<dyn VirtualClient> {
            Box::new(NoopClient)
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig::new("localhost", 5557, 8, 2, Duration::from_millis(50), 0, 0.0).unwrap()
    }

    fn single_prototype_set() -> PrototypeSet {
        PrototypeSet::new(vec![Box::new(NamedPrototype {
            name: "task".to_string(),
            weight: 1.0,
        })])
    }

    async fn expect_frame(transport: &MockTransport, expected: FrameType) -> Frame {
        let frame = transport.recv().await.expect("frame expected");
        assert_eq!(frame.frame_type, expected);
        frame
    }

    #[tokio::test]
    async fn announces_ready_on_connect() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        assert_eq!(runner.state(), RunnerState::Ready);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hatch_spawns_clients_and_reports_completion() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;

        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 100.0, "num_clients": 4 })),
            "coordinator",
        );
        coordinator_side.send(hatch).await.unwrap();

        expect_frame(&coordinator_side, FrameType::Hatching).await;
        let complete = expect_frame(&coordinator_side, FrameType::HatchComplete).await;
        assert_eq!(complete.data.unwrap()["count"], 4);
        assert_eq!(runner.state(), RunnerState::Running);
        assert_eq!(runner.actual_client_count(), 4);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_drains_clients_and_returns_to_ready() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 100.0, "num_clients": 2 })),
            "coordinator",
        );
        coordinator_side.send(hatch).await.unwrap();
        expect_frame(&coordinator_side, FrameType::Hatching).await;
        expect_frame(&coordinator_side, FrameType::HatchComplete).await;

        coordinator_side.send(Frame::new(FrameType::Stop, None, "coordinator")).await.unwrap();
        expect_frame(&coordinator_side, FrameType::ClientStopped).await;
        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        assert_eq!(runner.state(), RunnerState::Ready);
        assert_eq!(runner.actual_client_count(), 0);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_hatch_frame_is_ignored() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        let bad_hatch = Frame::new(FrameType::Hatch, None, "coordinator");
        coordinator_side.send(bad_hatch).await.unwrap();

        // Give the runner a moment to (not) react, then confirm it's still READY.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runner.state(), RunnerState::Ready);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn quit_while_running_stops_the_scheduler() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 100.0, "num_clients": 2 })),
            "coordinator",
        );
        coordinator_side.send(hatch).await.unwrap();
        expect_frame(&coordinator_side, FrameType::Hatching).await;
        expect_frame(&coordinator_side, FrameType::HatchComplete).await;

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hatch_while_running_is_an_illegal_transition() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 100.0, "num_clients": 1 })),
            "coordinator",
        );
        coordinator_side.send(hatch.clone()).await.unwrap();
        expect_frame(&coordinator_side, FrameType::Hatching).await;
        expect_frame(&coordinator_side, FrameType::HatchComplete).await;
        assert_eq!(runner.state(), RunnerState::Running);

        // A second hatch while RUNNING is illegal per §4.7/§7.
        coordinator_side.send(hatch).await.unwrap();
        let result = run_handle.await.unwrap();
        assert!(matches!(result, Err(SwarmError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn hatch_exceeding_pool_capacity_is_ignored() {
        // test_config() has buffer_size=8, threads=2, so max_supported is 10;
        // asking for 11 would permanently wedge the pool (every client
        // re-queues itself forever) and must be rejected instead.
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 100.0, "num_clients": 11 })),
            "coordinator",
        );
        coordinator_side.send(hatch).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runner.state(), RunnerState::Ready);
        assert_eq!(runner.actual_client_count(), 0);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn reconnect_reannounces_client_ready() {
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let worker_transport = Arc::new(worker_side);
        let transport_handle: Arc<dyn Transport> = Arc::clone(&worker_transport) as Arc<dyn Transport>;
        let runner = Arc::new(Runner::new(test_config(), transport_handle, single_prototype_set()));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        // The worker's own side of the link is the one the reconnect watcher
        // observes, not the coordinator's.
        worker_transport.simulate_reconnect().await;
        expect_frame(&coordinator_side, FrameType::ClientReady).await;

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_mid_hatch_aborts_spawning_and_returns_to_ready() {
        // S4: a slow hatch_rate paired with a stop shortly after hatching
        // begins should land well short of the requested client count.
        let (worker_side, coordinator_side) = MockTransport::new_pair();
        let runner = Arc::new(Runner::new(
            test_config(),
            Arc::new(worker_side),
            single_prototype_set(),
        ));
        let run_handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        // test_config() allows buffer_size(8) + threads(2) == 10 concurrently
        // live clients; request the maximum the pool can hold so the hatch is
        // accepted, paced slowly enough that a stop shortly after starting
        // still catches it mid-spawn.
        let hatch = Frame::new(
            FrameType::Hatch,
            Some(serde_json::json!({ "hatch_rate": 2.0, "num_clients": 10 })),
            "coordinator",
        );
        coordinator_side.send(hatch).await.unwrap();
        expect_frame(&coordinator_side, FrameType::Hatching).await;
        assert_eq!(runner.state(), RunnerState::Hatching);

        tokio::time::sleep(Duration::from_millis(30)).await;
        coordinator_side.send(Frame::new(FrameType::Stop, None, "coordinator")).await.unwrap();

        expect_frame(&coordinator_side, FrameType::ClientStopped).await;
        expect_frame(&coordinator_side, FrameType::ClientReady).await;
        assert_eq!(runner.state(), RunnerState::Ready);
        assert!(runner.actual_client_count() < 10);

        coordinator_side.send(Frame::quit("coordinator")).await.unwrap();
        run_handle.await.unwrap().unwrap();
    }
}
