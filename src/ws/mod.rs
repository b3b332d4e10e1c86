//! Resilient WebSocket connection.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: state machine owning one socket at a time, with heartbeat and
//!   reconnection
//! - [`Transport`]: seam between the state machine and an actual socket
//! - [`ReconnectPolicy`]: decides how long to wait before each retry, or when to give up
//! - [`EventDispatcher`]: listener registry fanning out lifecycle events and inbound envelopes
//!
//! Inbound frames are decoded as [`Envelope`]s and published on their `type` and on
//! [`event::MESSAGE`]. Frames that are not envelopes are published on [`event::MESSAGE`] only.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod policy;
pub mod transport;

pub use config::{BackoffConfig, Config};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatcher::{EventDispatcher, ListenerId};
pub use envelope::Envelope;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use event::{CloseInfo, Event};
pub use policy::{ExponentialPolicy, FixedDelay, ReconnectPolicy};
pub use transport::{Transport, TransportEvents, TransportHandle, TungsteniteTransport};
