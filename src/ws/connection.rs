#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Sleep, sleep};

use super::config::Config;
use super::dispatcher::{EventDispatcher, ListenerId};
use super::envelope::{Inbound, decode};
use super::error::WsError;
use super::event::{self, CloseInfo, Event};
use super::heartbeat::HeartbeatScheduler;
use super::policy::ReconnectPolicy;
use super::transport::{
    Generation, Transport, TransportEvent, TransportEventKind, TransportEvents, TransportHandle,
    TungsteniteTransport,
};
use crate::Result;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnectionState {
    /// A socket is being opened
    Connecting,
    /// The socket is open and the heartbeat is running
    Connected,
    /// Idle: never connected, closed on request, or waiting for a scheduled retry
    Disconnected,
    /// Failed with no retry pending
    Error,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Counts `disconnect`/`reconnect` calls. A queued command carrying an older value was
/// overridden before the event loop saw it.
type Intent = u64;

#[derive(Debug, Clone, Copy)]
enum Command {
    Connect(Intent),
    Reconnect(Intent),
    Disconnect,
}

/// State touched both by public operations and by the event loop.
#[derive(Debug)]
struct Shared {
    /// The single live (opening or open) handle
    link: Mutex<Option<TransportHandle>>,
    state_tx: watch::Sender<ConnectionState>,
    auto_reconnect: AtomicBool,
    /// Bumped under the link lock
    intent: AtomicU64,
    dispatcher: EventDispatcher,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Option<TransportHandle>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn intent(&self) -> Intent {
        self.intent.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    /// Turn off retries and close the live handle. Returns whether that handle had opened.
    fn shut_down(&self) -> bool {
        let mut link = self.link();
        self.intent.fetch_add(1, Ordering::SeqCst);
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        link.take().is_some_and(|handle| handle.is_open())
    }

    /// Close the live handle ahead of a fresh attempt. Returns the new intent and whether that
    /// handle had opened.
    fn restart(&self, auto_reconnect: bool) -> (Intent, bool) {
        let mut link = self.link();
        let intent = self.intent.fetch_add(1, Ordering::SeqCst) + 1;
        self.auto_reconnect.store(auto_reconnect, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        (intent, link.take().is_some_and(|handle| handle.is_open()))
    }

    /// Close whatever the link holds, unless `intent` has been overridden.
    fn retire(&self, intent: Intent) -> bool {
        let mut link = self.link();
        self.intent() == intent && link.take().is_some_and(|handle| handle.is_open())
    }

    fn dispatch_close(&self, reason: &str) {
        self.dispatcher
            .dispatch(event::CLOSE, &Event::Close(CloseInfo::client(reason)));
    }
}

struct Inner {
    config: Config,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.shut_down();
    }
}

/// Owns one duplex channel to a server and keeps it alive.
///
/// The manager drives a single state machine on a background task. Public operations return
/// immediately; their effect is observed through [`state`](Self::state),
/// [`state_receiver`](Self::state_receiver) and the lifecycle channels in
/// [`event`](super::event).
///
/// - At most one socket is live at a time. [`connect`](Self::connect) while connecting or
///   connected does nothing.
/// - Closes and errors are retried according to the [`ReconnectPolicy`] until it gives up,
///   at which point the state settles in [`ConnectionState::Error`].
/// - [`disconnect`](Self::disconnect) cancels everything before returning. Late callbacks from
///   abandoned sockets are ignored.
///
/// Cloning is cheap; every clone controls the same connection. The background task stops once
/// the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use realtime_link::ws::{Config, ConnectionManager, Event, event};
///
/// # async fn run() -> realtime_link::Result<()> {
/// let connection = ConnectionManager::new(Config::new("ws://localhost:3000/mcp-ws"))?;
///
/// connection.on("tool_result", |event: &Event| {
///     if let Some(envelope) = event.as_envelope() {
///         println!("result: {}", envelope.payload);
///     }
/// });
/// connection.on(event::ERROR, |event: &Event| eprintln!("{event:?}"));
///
/// connection.connect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager backed by `tokio-tungstenite` with the fixed-delay policy from `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let policy = config.reconnect_policy();
        Ok(Self::from_parts(config, TungsteniteTransport, policy))
    }

    /// Create a manager on top of a custom [`Transport`].
    ///
    /// The URL is handed to the transport untouched and is not validated.
    pub fn with_transport<T: Transport>(config: Config, transport: T) -> Self {
        let policy = config.reconnect_policy();
        Self::from_parts(config, transport, policy)
    }

    /// Create a manager with a custom [`Transport`] and [`ReconnectPolicy`].
    pub fn from_parts<T, P>(config: Config, transport: T, policy: P) -> Self
    where
        T: Transport,
        P: ReconnectPolicy,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (last_seen, _) = watch::channel(Instant::now());

        let shared = Arc::new(Shared {
            link: Mutex::new(None),
            state_tx,
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            intent: AtomicU64::new(0),
            dispatcher: EventDispatcher::new(),
        });

        let event_loop = EventLoop {
            config: config.clone(),
            shared: Arc::clone(&shared),
            transport: Box::new(transport),
            policy: Box::new(policy),
            events_tx,
            heartbeat: HeartbeatScheduler::new(),
            last_seen,
            generation: 0,
            attempts: 0,
            retry: None,
        };

        tokio::spawn(async move {
            event_loop.run(commands_rx, events_rx).await;
        });

        Self {
            inner: Arc::new(Inner {
                config,
                shared,
                commands: commands_tx,
            }),
        }
    }

    /// Start opening the connection. Does nothing while already connecting or connected.
    ///
    /// Re-enables automatic reconnection if a previous [`disconnect`](Self::disconnect)
    /// turned it off, and resets the retry counter.
    pub fn connect(&self) {
        self.command(Command::Connect(self.inner.shared.intent()));
    }

    /// Close the connection and stop reconnecting until the next `connect` or `reconnect`.
    ///
    /// The live socket is closed and its heartbeat stopped before this returns. Emits `close`
    /// if the socket had opened. Calling it again is a no-op.
    pub fn disconnect(&self) {
        let shared = &self.inner.shared;
        if shared.shut_down() {
            shared.dispatch_close("client disconnect");
        }
        self.command(Command::Disconnect);
    }

    /// Abandon the current attempt, successful or not, and begin a fresh one.
    ///
    /// Resets the retry counter, so this is also the way out of [`ConnectionState::Error`].
    pub fn reconnect(&self) {
        let shared = &self.inner.shared;
        let (intent, was_open) = shared.restart(self.inner.config.auto_reconnect);
        if was_open {
            shared.dispatch_close("client reconnect");
        }
        self.command(Command::Reconnect(intent));
    }

    /// Serialize `message` as JSON and hand it to the open socket.
    ///
    /// Object keys keep their insertion order, so a `json!` value is written as spelled.
    ///
    /// Returns `false` when not connected, when serialization fails, or when the socket writer
    /// has gone away.
    pub fn send<R: Serialize>(&self, message: &R) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_raw(text),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to serialize outbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Hand an already encoded text frame to the open socket.
    pub fn send_raw<S: Into<String>>(&self, text: S) -> bool {
        let link = self.inner.shared.link();
        let Some(handle) = link.as_ref().filter(|handle| handle.is_open()) else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Dropping outbound frame, not connected");
            return false;
        };

        match handle.send(text.into()) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to send frame");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                false
            }
        }
    }

    /// Register `callback` on a lifecycle channel, an envelope type, or [`event::WILDCARD`].
    pub fn on<F>(&self, event_type: &str, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.shared.dispatcher.on(event_type, callback)
    }

    /// Register a callback receiving payloads of `event_type` envelopes decoded as `T`.
    pub fn on_payload<T, F>(&self, event_type: &str, callback: F) -> ListenerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner.shared.dispatcher.on_payload(event_type, callback)
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn off(&self, event_type: &str, id: ListenerId) -> bool {
        self.inner.shared.dispatcher.off(event_type, id)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Subscribe to connection state changes.
    ///
    /// Intermediate states may be skipped when several transitions happen back to back; use
    /// the lifecycle channels to observe every transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state_tx.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    fn command(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!(?command, "Connection event loop has stopped");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("listeners", &self.inner.shared.dispatcher)
            .finish_non_exhaustive()
    }
}

enum Input {
    Command(Command),
    Transport(TransportEvent),
    RetryElapsed,
}

/// How a socket ended.
enum Termination {
    Closed(CloseInfo),
    Errored(WsError),
}

/// Outcome of consulting the policy after a socket ended.
enum Retry {
    Disabled,
    Scheduled { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// The only mutator of the retry counter and timer, and of the link outside of
/// `disconnect`/`reconnect`.
struct EventLoop {
    config: Config,
    shared: Arc<Shared>,
    transport: Box<dyn Transport>,
    policy: Box<dyn ReconnectPolicy>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    heartbeat: HeartbeatScheduler,
    last_seen: watch::Sender<Instant>,
    generation: Generation,
    /// Retries scheduled since the last successful open
    attempts: u32,
    retry: Option<Pin<Box<Sleep>>>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            let input = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    // Every manager handle is gone
                    None => break,
                },

                Some(event) = events.recv() => Input::Transport(event),

                () = retry_elapsed(&mut self.retry) => Input::RetryElapsed,
            };

            match input {
                Input::Command(command) => self.on_command(command),
                Input::Transport(event) => self.on_transport_event(event),
                Input::RetryElapsed => self.on_retry_elapsed(),
            }
        }

        self.retry = None;
        self.heartbeat.disarm();
        self.shared.shut_down();

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.config.url, "Connection event loop stopped");
    }

    fn on_command(&mut self, command: Command) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?command, "Handling command");

        match command {
            Command::Connect(intent) => {
                let shared = Arc::clone(&self.shared);
                let mut link = shared.link();
                if shared.intent() != intent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Connect was overridden before it ran, ignoring");
                    return;
                }
                if link.is_some() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Already connecting or connected, ignoring connect");
                    return;
                }

                shared
                    .auto_reconnect
                    .store(self.config.auto_reconnect, Ordering::SeqCst);
                self.retry = None;
                self.attempts = 0;
                self.open_transport(&mut link);
            }
            Command::Reconnect(intent) => {
                let shared = Arc::clone(&self.shared);
                if shared.intent() != intent {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Reconnect was overridden before it ran, ignoring");
                    return;
                }

                self.retry = None;
                self.heartbeat.disarm();
                self.attempts = 0;

                // A handle opened by the retry timer in the meantime is replaced as well
                if shared.retire(intent) {
                    shared.dispatch_close("client reconnect");
                }

                let mut link = shared.link();
                if shared.intent() == intent {
                    self.open_transport(&mut link);
                }
            }
            // The link was already retired by `disconnect`
            Command::Disconnect => {
                self.retry = None;
                self.heartbeat.disarm();
            }
        }
    }

    /// Open a fresh socket into `link`, replacing whatever it held.
    fn open_transport(&mut self, link: &mut Option<TransportHandle>) {
        drop(link.take());

        self.generation += 1;
        let events = TransportEvents::new(self.generation, self.events_tx.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            url = %self.config.url,
            generation = self.generation,
            attempt = self.attempts,
            "Opening transport"
        );

        *link = Some(self.transport.open(&self.config.url, events));
        self.shared.set_state(ConnectionState::Connecting);
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent { generation, kind } = event;
        match kind {
            TransportEventKind::Opened => self.on_opened(generation),
            TransportEventKind::Frame(text) => self.on_frame(generation, text),
            TransportEventKind::Closed(info) => {
                self.on_terminated(generation, Termination::Closed(info));
            }
            TransportEventKind::Errored(error) => {
                self.on_terminated(generation, Termination::Errored(error));
            }
        }
    }

    fn on_opened(&mut self, generation: Generation) {
        let shared = Arc::clone(&self.shared);
        {
            let mut link = shared.link();
            let Some(handle) = link
                .as_mut()
                .filter(|handle| handle.generation() == generation && !handle.is_open())
            else {
                #[cfg(feature = "tracing")]
                tracing::trace!(generation, "Ignoring open from stale transport");
                return;
            };

            handle.mark_open();
            self.attempts = 0;
            self.last_seen.send_replace(Instant::now());
            self.heartbeat.arm(
                handle,
                TransportEvents::new(generation, self.events_tx.clone()),
                self.config.heartbeat_interval,
                self.config.heartbeat_timeout,
                self.last_seen.subscribe(),
            );
            shared.set_state(ConnectionState::Connected);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(url = %self.config.url, generation, "Connected");

        shared.dispatcher.dispatch(event::OPEN, &Event::Open);
    }

    fn on_frame(&self, generation: Generation, text: String) {
        if !is_live(&self.shared.link(), generation) {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "Ignoring frame from stale transport");
            return;
        }

        self.last_seen.send_replace(Instant::now());
        let dispatcher = &self.shared.dispatcher;

        match decode(text) {
            Inbound::Envelope(envelope) => {
                let msg_type = envelope.msg_type.clone();
                let event = Event::Message(envelope);

                if event::is_reserved(&msg_type) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%msg_type, "Envelope uses a reserved channel name");
                } else {
                    dispatcher.dispatch(&msg_type, &event);
                }
                dispatcher.dispatch(event::MESSAGE, &event);
            }
            Inbound::Raw(text) => dispatcher.dispatch(event::MESSAGE, &Event::Raw(text)),
        }
    }

    fn on_terminated(&mut self, generation: Generation, termination: Termination) {
        let shared = Arc::clone(&self.shared);
        let retry = {
            let mut link = shared.link();
            if !is_live(&link, generation) {
                #[cfg(feature = "tracing")]
                tracing::trace!(generation, "Ignoring termination of stale transport");
                return;
            }

            drop(link.take());
            self.heartbeat.disarm();

            let retry = self.schedule_retry();
            let state = match (&termination, &retry) {
                (_, Retry::Scheduled { .. }) | (Termination::Closed(_), Retry::Disabled) => {
                    ConnectionState::Disconnected
                }
                (_, Retry::Exhausted { .. }) | (Termination::Errored(_), Retry::Disabled) => {
                    ConnectionState::Error
                }
            };
            shared.set_state(state);
            retry
        };

        let dispatcher = &shared.dispatcher;
        match termination {
            Termination::Closed(info) => {
                #[cfg(feature = "tracing")]
                tracing::info!(generation, %info, "Connection closed");
                dispatcher.dispatch(event::CLOSE, &Event::Close(info));
            }
            Termination::Errored(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(generation, %error, "Connection failed");
                dispatcher.dispatch(event::ERROR, &Event::Error(error));
            }
        }

        match retry {
            Retry::Disabled => {}
            Retry::Scheduled { attempt, delay } => {
                dispatcher.dispatch(event::RECONNECTING, &Event::Reconnecting { attempt, delay });
            }
            Retry::Exhausted { attempts } => {
                dispatcher.dispatch(
                    event::ERROR,
                    &Event::Error(WsError::RetriesExhausted { attempts }),
                );
            }
        }
    }

    /// Must run under the link lock so `disconnect` cannot interleave.
    fn schedule_retry(&mut self) -> Retry {
        if !self.shared.auto_reconnect.load(Ordering::SeqCst) {
            return Retry::Disabled;
        }

        let attempt = self.attempts.saturating_add(1);
        match self.policy.next_delay(attempt) {
            Some(delay) => {
                #[cfg(feature = "tracing")]
                tracing::info!(attempt, ?delay, "Scheduling reconnect");
                self.attempts = attempt;
                self.retry = Some(Box::pin(sleep(delay)));
                Retry::Scheduled { attempt, delay }
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::error!(attempts = self.attempts, "Giving up reconnecting");
                Retry::Exhausted {
                    attempts: self.attempts,
                }
            }
        }
    }

    fn on_retry_elapsed(&mut self) {
        self.retry = None;

        let shared = Arc::clone(&self.shared);
        let mut link = shared.link();
        if !shared.auto_reconnect.load(Ordering::SeqCst) || link.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Skipping scheduled reconnect");
            return;
        }

        self.open_transport(&mut link);
    }
}

fn is_live(link: &Option<TransportHandle>, generation: Generation) -> bool {
    link.as_ref()
        .is_some_and(|handle| handle.generation() == generation)
}

/// Resolves when the retry timer fires; never resolves while no retry is pending.
async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_and_serialize_uppercase() {
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionState::Error.to_string(), "ERROR");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Disconnected).unwrap(),
            r#""DISCONNECTED""#
        );
    }

    #[test]
    fn only_connected_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Error.is_connected());
    }

    #[tokio::test]
    async fn send_while_idle_is_rejected() {
        #[derive(Debug)]
        struct NeverOpens;

        impl Transport for NeverOpens {
            fn open(&self, _url: &str, events: TransportEvents) -> TransportHandle {
                let (outbound, _) = mpsc::unbounded_channel();
                TransportHandle::new(
                    events.generation(),
                    outbound,
                    tokio_util::sync::CancellationToken::new(),
                )
            }
        }

        let connection = ConnectionManager::with_transport(Config::new("ws://x"), NeverOpens);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!connection.send(&serde_json::json!({ "type": "x", "payload": 1 })));

        connection.connect();
        tokio::task::yield_now().await;
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(!connection.send_raw("still opening"));
    }
}
