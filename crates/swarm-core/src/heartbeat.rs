//! Periodic heartbeat emission (§4.6).
//!
//! Resolves the spec's open question of whether the heartbeat ticker
//! survives a reconnect: it does not. Every time the transport's `connected`
//! signal settles back to `true` the ticker is torn down and rebuilt from
//! scratch, so a heartbeat never fires against a connection it predates.
//! Going briefly silent after a network blip and then resuming on a fresh
//! cadence is a safer failure mode than drifting out of sync with a
//! reconnected link.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::message::Frame;
use crate::transport::Transport;

/// Spawn the heartbeat task. Stops when `cancel` fires.
pub fn spawn_heartbeat(
    transport: Arc<dyn Transport>,
    node_id: String,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut connected_rx = transport.connected();
        loop {
            if !*connected_rx.borrow() {
                tokio::select! {
                    result = connected_rx.changed() => {
                        if result.is_err() {
                            return;
                        }
                        if !*connected_rx.borrow() {
                            continue;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick so the cadence starts fresh
            // rather than firing a heartbeat the instant we (re)connect.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = transport.send(Frame::heartbeat(&node_id)).await;
                    }
                    result = connected_rx.changed() => {
                        if result.is_err() {
                            return;
                        }
                        // Connection state changed — whatever it settled to,
                        // tear down this ticker and re-evaluate from the top.
                        break;
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FrameType;
    use crate::transport::mock::MockTransport;

    #[tokio::test]
    async fn emits_heartbeats_on_a_steady_cadence() {
        let (worker, coordinator) = MockTransport::new_pair();
        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(
            Arc::new(worker),
            "node-1".to_string(),
            Duration::from_millis(20),
            cancel.clone(),
        );

        let first = coordinator.recv().await.unwrap();
        assert_eq!(first.frame_type, FrameType::Heartbeat);
        let second = coordinator.recv().await.unwrap();
        assert_eq!(second.frame_type, FrameType::Heartbeat);

        cancel.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn stops_emitting_once_cancelled() {
        let (worker, coordinator) = MockTransport::new_pair();
        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(
            Arc::new(worker),
            "node-1".to_string(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        let _ = coordinator.recv().await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
