//! Concrete [`Transport`] over a length-delimited, JSON-framed TCP stream.
//!
//! Grounded on the buffered/length-delimited `Framed` idiom the pack uses for
//! wire framing (`Rw<S>` over `BufStream<S>` + `LengthDelimitedCodec`), but
//! splits the stream into independent read/write halves so an in-flight
//! `recv()` — which can legitimately block for a long time waiting on the
//! coordinator — never starves an outgoing `send()` (e.g. a heartbeat).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::SwarmError;
use crate::message::Frame;
use crate::prototype::BoxFuture;
use crate::transport::Transport;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

type Reader = FramedRead<BufReader<OwnedReadHalf>, LengthDelimitedCodec>;
type Writer = FramedWrite<BufWriter<OwnedWriteHalf>, LengthDelimitedCodec>;

pub struct TcpTransport {
    host: String,
    port: u16,
    reader: Arc<Mutex<Option<Reader>>>,
    writer: Arc<Mutex<Option<Writer>>>,
    connected_tx: Arc<watch::Sender<bool>>,
    connected_rx: watch::Receiver<bool>,
    disposed: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        Self {
            host: host.into(),
            port,
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            connected_tx: Arc::new(connected_tx),
            connected_rx,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn reconnect(&self) -> Result<(), SwarmError> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.disposed.load(Ordering::Relaxed) {
                return Err(SwarmError::TransportInit("transport disposed".to_string()));
            }
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let (rh, wh) = stream.into_split();
                    let reader = FramedRead::new(BufReader::new(rh), LengthDelimitedCodec::new());
                    let writer = FramedWrite::new(BufWriter::new(wh), LengthDelimitedCodec::new());
                    *self.reader.lock().await = Some(reader);
                    *self.writer.lock().await = Some(writer);
                    let _ = self.connected_tx.send(true);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        host = %self.host,
                        port = self.port,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "coordinator connect failed, retrying"
                    );
                    let _ = self.connected_tx.send(false);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    fn initialize<'a>(&'a self) -> BoxFuture<'a, Result<(), SwarmError>> {
        Box::pin(async move { self.reconnect().await })
    }

    fn send<'a>(&'a self, frame: Frame) -> BoxFuture<'a, Result<(), SwarmError>> {
        Box::pin(async move {
            loop {
                if self.disposed.load(Ordering::Relaxed) {
                    return Err(SwarmError::TransportSend("transport disposed".to_string()));
                }
                {
                    let mut guard = self.writer.lock().await;
                    if let Some(writer) = guard.as_mut() {
                        let bytes = serde_json::to_vec(&frame)?;
                        match writer.send(Bytes::from(bytes)).await {
                            Ok(()) => return Ok(()),
                            Err(e) => {
                                tracing::warn!(error = %e, "send failed, reconnecting");
                                *guard = None;
                            }
                        }
                    }
                }
                let _ = self.connected_tx.send(false);
                self.reconnect().await?;
            }
        })
    }

    fn recv<'a>(&'a self) -> BoxFuture<'a, Option<Frame>> {
        Box::pin(async move {
            loop {
                if self.disposed.load(Ordering::Relaxed) {
                    return None;
                }
                {
                    let mut guard = self.reader.lock().await;
                    if let Some(reader) = guard.as_mut() {
                        match reader.next().await {
                            Some(Ok(bytes)) => match serde_json::from_slice::<Frame>(&bytes) {
                                Ok(frame) => return Some(frame),
                                Err(e) => {
                                    tracing::warn!(error = %e, "dropping malformed frame");
                                    continue;
                                }
                            },
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "recv error, reconnecting");
                                *guard = None;
                            }
                            None => {
                                tracing::warn!("coordinator closed connection, reconnecting");
                                *guard = None;
                            }
                        }
                    }
                }
                let _ = self.connected_tx.send(false);
                if self.reconnect().await.is_err() {
                    return None;
                }
            }
        })
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    fn dispose<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.disposed.store(true, Ordering::Relaxed);
            *self.reader.lock().await = None;
            *self.writer.lock().await = None;
            let _ = self.connected_tx.send(false);
        })
    }
}
