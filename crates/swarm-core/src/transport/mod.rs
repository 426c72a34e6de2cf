//! Transport abstraction (§4.2, Design Notes §9).
//!
//! The coordinator protocol in the spec is described in callback terms
//! (`on_connected`, `on_message`), but a callback-subclassing shape doesn't
//! fit a trait object cleanly. Instead [`Transport`] is pull-style: one
//! driving task calls `recv()` in a loop (so message handling is naturally
//! sequential) and observes reconnects through a `watch<bool>` channel rather
//! than a callback firing on an arbitrary thread.

pub mod mock;
pub mod tcp;

use tokio::sync::watch;

use crate::error::SwarmError;
use crate::message::Frame;
use crate::prototype::BoxFuture;

pub use tcp::TcpTransport;

/// A bidirectional frame channel to the coordinator.
///
/// Implementations own their own reconnect policy; `connected()` fires a new
/// value every time the link drops or is (re-)established so a driving task
/// can restart anything that's tied to connection lifetime (e.g. the
/// heartbeat ticker, §4.6).
pub trait Transport: Send + Sync {
    /// Establish the first connection. Returns once connected or once the
    /// implementation gives up (it is not required to retry forever here —
    /// ongoing reconnects during `send`/`recv` are its own concern).
    fn initialize<'a>(&'a self) -> BoxFuture<'a, Result<(), SwarmError>>;

    /// Send one frame, reconnecting transparently on a broken link.
    fn send<'a>(&'a self, frame: Frame) -> BoxFuture<'a, Result<(), SwarmError>>;

    /// Receive the next inbound frame. Returns `None` only after `dispose()`
    /// has been called; transient errors are retried internally and never
    /// surfaced here.
    fn recv<'a>(&'a self) -> BoxFuture<'a, Option<Frame>>;

    /// A signal that carries the current connection state and changes on
    /// every connect/disconnect/reconnect transition.
    fn connected(&self) -> watch::Receiver<bool>;

    /// Tear down the connection and make `recv()` return `None` for any
    /// waiter.
    fn dispose<'a>(&'a self) -> BoxFuture<'a, ()>;
}
