//! An in-memory [`Transport`] backed by a channel pair, for deterministic
//! tests that don't want to bind real sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use crate::error::SwarmError;
use crate::message::Frame;
use crate::prototype::BoxFuture;
use crate::transport::Transport;

/// One end of an in-process transport pair. `new_pair()` returns two
/// `MockTransport`s wired so that what one side sends, the other receives.
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    connected_tx: Arc<watch::Sender<bool>>,
    connected_rx: watch::Receiver<bool>,
    disposed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Build a connected pair: `(worker_side, coordinator_side)`.
    pub fn new_pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let (a_connected_tx, a_connected_rx) = watch::channel(true);
        let (b_connected_tx, b_connected_rx) = watch::channel(true);
        let worker_side = MockTransport {
            outbound: b_tx,
            inbound: Arc::new(Mutex::new(a_rx)),
            connected_tx: Arc::new(a_connected_tx),
            connected_rx: a_connected_rx,
            disposed: Arc::new(AtomicBool::new(false)),
        };
        let coordinator_side = MockTransport {
            outbound: a_tx,
            inbound: Arc::new(Mutex::new(b_rx)),
            connected_tx: Arc::new(b_connected_tx),
            connected_rx: b_connected_rx,
            disposed: Arc::new(AtomicBool::new(false)),
        };
        (worker_side, coordinator_side)
    }

    /// Simulate a disconnect/reconnect transition without tearing anything
    /// down — useful for exercising heartbeat-restart-on-reconnect logic.
    /// Yields between the two transitions so a concurrently-polling task can
    /// actually observe the intermediate disconnected state.
    pub async fn simulate_reconnect(&self) {
        let _ = self.connected_tx.send(false);
        tokio::task::yield_now().await;
        let _ = self.connected_tx.send(true);
    }
}

impl Transport for MockTransport {
    fn initialize<'a>(&'a self) -> BoxFuture<'a, Result<(), SwarmError>> {
        Box::pin(async move { Ok(()) })
    }

    fn send<'a>(&'a self, frame: Frame) -> BoxFuture<'a, Result<(), SwarmError>> {
        Box::pin(async move {
            if self.disposed.load(Ordering::Relaxed) {
                return Err(SwarmError::TransportSend("mock transport disposed".to_string()));
            }
            self.outbound
                .send(frame)
                .map_err(|_| SwarmError::TransportSend("peer dropped".to_string()))
        })
    }

    fn recv<'a>(&'a self) -> BoxFuture<'a, Option<Frame>> {
        Box::pin(async move {
            if self.disposed.load(Ordering::Relaxed) {
                return None;
            }
            self.inbound.lock().await.recv().await
        })
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    fn dispose<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.disposed.store(true, Ordering::Relaxed);
            let _ = self.connected_tx.send(false);
        })
    }
}
