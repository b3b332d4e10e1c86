#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// Error reported by a non-tungstenite transport
    Transport(String),
    /// WebSocket connection was closed
    ConnectionClosed,
    /// No inbound frame arrived within the configured heartbeat timeout
    HeartbeatTimeout,
    /// The reconnection policy gave up
    RetriesExhausted {
        /// Number of retries that were scheduled before giving up
        attempts: u32,
    },
    /// Error parsing a WebSocket message
    MessageParse(serde_json::Error),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Transport(reason) => write!(f, "WebSocket transport error: {reason}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::HeartbeatTimeout => write!(f, "WebSocket heartbeat timed out"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "Reconnection abandoned after {attempts} attempts")
            }
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::MessageParse(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn retries_exhausted_display() {
        let error = WsError::RetriesExhausted { attempts: 5 };
        assert_eq!(error.to_string(), "Reconnection abandoned after 5 attempts");
    }

    #[test]
    fn display_names_each_failure() {
        let parse = serde_json::from_str::<u8>("x").unwrap_err();
        let cases = [
            (WsError::Transport("refused".to_owned()), "WebSocket transport error: refused"),
            (WsError::ConnectionClosed, "WebSocket connection closed"),
            (WsError::HeartbeatTimeout, "WebSocket heartbeat timed out"),
        ];
        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
            assert!(error.source().is_none());
        }

        let error = WsError::MessageParse(parse);
        assert!(error.to_string().starts_with("Failed to parse WebSocket message: "));
        assert!(error.source().is_some());
    }

    #[test]
    fn converts_into_websocket_kind() {
        let error: crate::error::Error = WsError::HeartbeatTimeout.into();

        assert_eq!(error.kind(), Kind::WebSocket);
        assert!(matches!(
            error.downcast_ref::<WsError>(),
            Some(WsError::HeartbeatTimeout)
        ));
    }
}
