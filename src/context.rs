//! Read-only view of a connection for the rest of an application.
//!
//! [`ConnectionContext`] tracks `{is_connected, status, last_error}` by listening to the
//! `open`, `close` and `error` channels, and passes `send` and `reconnect` through to the
//! [`ConnectionManager`]. Consumers that only need to render connection status or fire messages
//! hold a context instead of the manager itself.

use serde::Serialize;
use tokio::sync::watch;

use crate::ws::dispatcher::ListenerId;
use crate::ws::event::{self, Event};
use crate::ws::{ConnectionManager, ConnectionState};

/// Connection status as last observed by a [`ConnectionContext`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub is_connected: bool,
    pub status: ConnectionState,
    /// Message of the most recent error, cleared on the next successful open
    pub last_error: Option<String>,
}

impl Snapshot {
    fn new(status: ConnectionState) -> Self {
        Self {
            is_connected: status.is_connected(),
            status,
            last_error: None,
        }
    }

    fn apply(&mut self, status: ConnectionState, event: &Event) {
        self.status = status;
        self.is_connected = status.is_connected();
        match event {
            Event::Open => self.last_error = None,
            Event::Error(error) => self.last_error = Some(error.to_string()),
            _ => {}
        }
    }
}

/// Shares one [`ConnectionManager`] with the rest of an application.
///
/// Dropping the context removes its listeners; the connection itself stays up as long as
/// another handle to the manager exists.
#[derive(Debug)]
pub struct ConnectionContext {
    connection: ConnectionManager,
    snapshot: watch::Receiver<Snapshot>,
    listeners: Vec<(&'static str, ListenerId)>,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(Snapshot::new(connection.state()));

        let listeners = [event::OPEN, event::CLOSE, event::ERROR]
            .into_iter()
            .map(|channel| {
                let snapshot_tx = snapshot_tx.clone();
                let state = connection.state_receiver();
                let id = connection.on(channel, move |event| {
                    let status = *state.borrow();
                    snapshot_tx.send_modify(|snapshot| snapshot.apply(status, event));
                });
                (channel, id)
            })
            .collect();

        Self {
            connection,
            snapshot,
            listeners,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified every time the snapshot is recomputed.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected
    }

    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.snapshot.borrow().status
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().last_error.clone()
    }

    /// See [`ConnectionManager::send`].
    pub fn send<R: Serialize>(&self, message: &R) -> bool {
        self.connection.send(message)
    }

    /// See [`ConnectionManager::reconnect`].
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        for (channel, id) in self.listeners.drain(..) {
            self.connection.off(channel, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ws::error::WsError;
    use crate::ws::event::CloseInfo;

    #[test]
    fn snapshot_serializes_camel_case() {
        let snapshot = Snapshot {
            is_connected: false,
            status: ConnectionState::Error,
            last_error: Some("boom".to_owned()),
        };

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({ "isConnected": false, "status": "ERROR", "lastError": "boom" })
        );
    }

    #[test]
    fn open_clears_last_error() {
        let mut snapshot = Snapshot::new(ConnectionState::Disconnected);

        snapshot.apply(
            ConnectionState::Error,
            &Event::Error(WsError::Transport("refused".to_owned())),
        );
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("WebSocket transport error: refused")
        );
        assert!(!snapshot.is_connected);

        snapshot.apply(
            ConnectionState::Disconnected,
            &Event::Close(CloseInfo::new(Some(1006), "abnormal")),
        );
        assert!(snapshot.last_error.is_some(), "close keeps the last error");

        snapshot.apply(ConnectionState::Connected, &Event::Open);
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.status, ConnectionState::Connected);
        assert_eq!(snapshot.last_error, None);
    }
}
