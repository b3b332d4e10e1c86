#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use realtime_link::ws::event::{CLOSE, ERROR, OPEN, RECONNECTING};
use realtime_link::ws::{
    CloseInfo, Config, ConnectionManager, Event, Transport, TransportEvents, TransportHandle,
    WsError,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const URL: &str = "ws://x";

/// What a [`ScriptedTransport`] reports right after `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Open,
    Fail,
    /// Report nothing; the test drives the attempt by hand
    Hang,
}

#[derive(Debug)]
struct Attempt {
    generation: u64,
    opened_at: Instant,
    events: TransportEvents,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Script {
    outcomes: VecDeque<Outcome>,
    fallback: Outcome,
    attempts: Vec<Attempt>,
}

/// In-memory [`Transport`] that plays back scripted outcomes and records every attempt.
///
/// Clones share the same script and records, so a test keeps one clone and hands the other
/// to the manager.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Plays `outcomes` in order, then opens successfully.
    pub fn new<I: IntoIterator<Item = Outcome>>(outcomes: I) -> Self {
        Self::with_fallback(outcomes, Outcome::Open)
    }

    /// Plays `outcomes` in order, then `fallback` forever.
    pub fn with_fallback<I: IntoIterator<Item = Outcome>>(outcomes: I, fallback: Outcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                outcomes: outcomes.into_iter().collect(),
                fallback,
                attempts: Vec::new(),
            })),
        }
    }

    /// Every attempt fails to open.
    pub fn failing() -> Self {
        Self::with_fallback([], Outcome::Fail)
    }

    /// Number of times `open` was called.
    pub fn opens(&self) -> usize {
        self.script.lock().unwrap().attempts.len()
    }

    /// Attempts whose handle has not been closed.
    pub fn live(&self) -> usize {
        self.script
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|attempt| !attempt.cancel.is_cancelled())
            .count()
    }

    pub fn is_closed(&self, attempt: usize) -> bool {
        self.script.lock().unwrap().attempts[attempt].cancel.is_cancelled()
    }

    pub fn generations(&self) -> Vec<u64> {
        self.script
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|attempt| attempt.generation)
            .collect()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.script
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|attempt| attempt.opened_at)
            .collect()
    }

    /// Drain the frames the manager wrote to `attempt`.
    pub fn frames(&self, attempt: usize) -> Vec<String> {
        let mut script = self.script.lock().unwrap();
        let outbound = &mut script.attempts[attempt].outbound;
        let mut frames = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drain the frames written to every attempt.
    pub fn all_frames(&self) -> Vec<String> {
        (0..self.opens()).flat_map(|attempt| self.frames(attempt)).collect()
    }

    pub fn open(&self, attempt: usize) {
        self.events(attempt).opened();
    }

    pub fn frame(&self, attempt: usize, text: &str) {
        self.events(attempt).frame(text.to_owned());
    }

    pub fn close(&self, attempt: usize, code: u16, reason: &str) {
        self.events(attempt)
            .closed(CloseInfo::new(Some(code), reason));
    }

    pub fn fail(&self, attempt: usize, reason: &str) {
        self.events(attempt)
            .errored(WsError::Transport(reason.to_owned()));
    }

    fn events(&self, attempt: usize) -> TransportEvents {
        self.script.lock().unwrap().attempts[attempt].events.clone()
    }
}

impl Transport for ScriptedTransport {
    fn open(&self, _url: &str, events: TransportEvents) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = TransportHandle::new(events.generation(), outbound_tx, cancel.clone());

        let mut script = self.script.lock().unwrap();
        let outcome = script.outcomes.pop_front().unwrap_or(script.fallback);
        match outcome {
            Outcome::Open => {
                events.opened();
            }
            Outcome::Fail => {
                events.errored(WsError::Transport("connection refused".to_owned()));
            }
            Outcome::Hang => {}
        }

        script.attempts.push(Attempt {
            generation: events.generation(),
            opened_at: Instant::now(),
            events,
            outbound: outbound_rx,
            cancel,
        });

        handle
    }
}

/// Configuration used across the scripted tests: two retries, 100ms apart, 5s heartbeat.
pub fn config() -> Config {
    Config::builder()
        .url(URL)
        .max_reconnect_attempts(2)
        .reconnect_delay(Duration::from_millis(100))
        .heartbeat_interval(Duration::from_secs(5))
        .build()
}

pub fn manager(transport: &ScriptedTransport) -> ConnectionManager {
    ConnectionManager::with_transport(config(), transport.clone())
}

/// Let the connection event loop drain everything queued so far.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub type Log = Arc<Mutex<Vec<String>>>;

/// Short description of an event, e.g. `close:1000`, `reconnecting:2:100ms`.
pub fn describe(event: &Event) -> String {
    match event {
        Event::Open => "open".to_owned(),
        Event::Close(info) => match info.code {
            Some(code) => format!("close:{code}"),
            None => "close".to_owned(),
        },
        Event::Error(WsError::RetriesExhausted { attempts }) => format!("exhausted:{attempts}"),
        Event::Error(WsError::HeartbeatTimeout) => "error:heartbeat".to_owned(),
        Event::Error(_) => "error".to_owned(),
        Event::Reconnecting { attempt, delay } => {
            format!("reconnecting:{attempt}:{}ms", delay.as_millis())
        }
        Event::Message(envelope) => format!("message:{}", envelope.msg_type),
        Event::Raw(text) => format!("raw:{text}"),
        _ => "other".to_owned(),
    }
}

/// Record every event published on `channels`.
pub fn record(connection: &ConnectionManager, channels: &[&str]) -> Log {
    let log = Log::default();
    for channel in channels {
        let log = Arc::clone(&log);
        connection.on(channel, move |event| log.lock().unwrap().push(describe(event)));
    }
    log
}

/// Record the lifecycle channels.
pub fn record_lifecycle(connection: &ConnectionManager) -> Log {
    record(connection, &[OPEN, CLOSE, ERROR, RECONNECTING])
}

pub fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}
