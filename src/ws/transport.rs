#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types expose their domain in the name for clarity"
)]

//! The seam between the connection state machine and an actual socket.
//!
//! A [`Transport`] opens one socket per call and reports its lifecycle through
//! [`TransportEvents`], tagged with the generation the manager assigned to that attempt.
//! The returned [`TransportHandle`] is the manager's only way to write to or close it.

use std::fmt::Debug;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use super::error::WsError;
use super::event::CloseInfo;

/// Monotonically increasing tag identifying one connection attempt.
pub type Generation = u64;

/// Opens sockets on behalf of a [`ConnectionManager`](super::ConnectionManager).
pub trait Transport: Debug + Send + Sync + 'static {
    /// Start opening a socket toward `url`.
    ///
    /// Must return immediately. Progress is reported through `events`: at most one
    /// [`TransportEvents::opened`], any number of frames, then at most one of
    /// [`TransportEvents::closed`] or [`TransportEvents::errored`]. Nothing may be reported
    /// after the returned handle has been closed or dropped.
    fn open(&self, url: &str, events: TransportEvents) -> TransportHandle;
}

/// Lifecycle notification from a transport.
#[non_exhaustive]
#[derive(Debug)]
pub struct TransportEvent {
    pub generation: Generation,
    pub kind: TransportEventKind,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEventKind {
    Opened,
    Frame(String),
    Closed(CloseInfo),
    Errored(WsError),
}

/// Reporting side handed to [`Transport::open`].
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: Generation,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    #[must_use]
    pub fn new(generation: Generation, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns `false` once the manager is gone.
    pub fn opened(&self) -> bool {
        self.emit(TransportEventKind::Opened)
    }

    pub fn frame(&self, text: String) -> bool {
        self.emit(TransportEventKind::Frame(text))
    }

    pub fn closed(&self, info: CloseInfo) -> bool {
        self.emit(TransportEventKind::Closed(info))
    }

    pub fn errored(&self, error: WsError) -> bool {
        self.emit(TransportEventKind::Errored(error))
    }

    fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// Owner of one socket. Dropping the handle closes the socket.
#[derive(Debug)]
pub struct TransportHandle {
    generation: Generation,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    open: bool,
}

impl TransportHandle {
    /// `outbound` feeds the socket writer; `cancel` must close the socket when cancelled.
    #[must_use]
    pub fn new(
        generation: Generation,
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            generation,
            outbound,
            cancel,
            open: false,
        }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether the manager has seen this socket open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    /// Hand a text frame to the socket writer.
    pub fn send(&self, frame: String) -> Result<(), WsError> {
        self.outbound
            .send(frame)
            .map_err(|_e| WsError::ConnectionClosed)
    }

    pub(crate) fn outbound(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// Token cancelled when this handle closes.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// [`Transport`] backed by `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str, events: TransportEvents) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = TransportHandle::new(events.generation(), outbound_tx, cancel.clone());

        let url = url.to_owned();
        tokio::spawn(async move {
            Self::run(url, events, outbound_rx, cancel).await;
        });

        handle
    }
}

impl TungsteniteTransport {
    async fn run(
        url: String,
        events: TransportEvents,
        mut outbound: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            result = connect_async(url.as_str()) => result,
        };

        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%url, error = %e, "Unable to connect");
                events.errored(WsError::Connection(e));
                return;
            }
        };

        if !events.opened() {
            return;
        }

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closing".into(),
                    };
                    _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");
                            events.frame(text.to_string());
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                events.frame(text);
                            }
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(error = %e, "Dropping non UTF-8 binary frame");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &e;
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let info = frame.map_or_else(
                                || CloseInfo::new(None, "closed by peer"),
                                |frame| CloseInfo::new(Some(u16::from(frame.code)), frame.reason.to_string()),
                            );
                            events.closed(info);
                            break;
                        }
                        Some(Err(e)) => {
                            events.errored(WsError::Connection(e));
                            break;
                        }
                        None => {
                            events.closed(CloseInfo::new(None, "stream ended"));
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong frames are answered by tungstenite itself.
                        }
                    }
                }

                Some(text) = outbound.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        events.errored(WsError::Connection(e));
                        break;
                    }
                }
            }
        }
    }
}
