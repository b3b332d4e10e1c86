//! Events delivered to listeners and the channel names they are published on.

use std::fmt;
use std::time::Duration;

use super::envelope::Envelope;
use super::error::WsError;

/// The transport finished opening.
pub const OPEN: &str = "open";
/// The connection closed.
pub const CLOSE: &str = "close";
/// A transport error occurred, or reconnection was abandoned.
pub const ERROR: &str = "error";
/// Every inbound frame, decoded or not.
pub const MESSAGE: &str = "message";
/// A reconnection attempt has been scheduled.
pub const RECONNECTING: &str = "reconnecting";
/// Listeners on this channel observe every dispatch on every channel.
pub const WILDCARD: &str = "*";

/// Whether `name` is a lifecycle or wildcard channel rather than an envelope type.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        OPEN | CLOSE | ERROR | MESSAGE | RECONNECTING | WILDCARD
    )
}

/// Payload handed to listeners.
#[non_exhaustive]
#[derive(Debug)]
pub enum Event {
    /// Published on [`OPEN`]
    Open,
    /// Published on [`CLOSE`]
    Close(CloseInfo),
    /// Published on [`ERROR`]
    Error(WsError),
    /// Published on [`RECONNECTING`]
    Reconnecting {
        /// 1-based attempt number since the last successful open
        attempt: u32,
        /// Wait before the attempt starts
        delay: Duration,
    },
    /// Published on the envelope's own type and on [`MESSAGE`]
    Message(Envelope),
    /// Published on [`MESSAGE`] only, for frames that are not envelopes
    Raw(String),
}

impl Event {
    #[must_use]
    pub fn as_envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Message(envelope) => Some(envelope),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&WsError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// Why a connection closed.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, if the peer sent one (1000 = normal, 1006 = abnormal)
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    /// Close code sent when this client closes the connection on purpose.
    pub const NORMAL: u16 = 1000;

    #[must_use]
    pub fn new<S: Into<String>>(code: Option<u16>, reason: S) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close initiated locally by `disconnect` or `reconnect`.
    #[must_use]
    pub fn client<S: Into<String>>(reason: S) -> Self {
        Self::new(Some(Self::NORMAL), reason)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {code})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}
