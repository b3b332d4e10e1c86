#![expect(
    clippy::module_name_repetitions,
    reason = "HeartbeatScheduler is the public name used outside this module"
)]

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::envelope::Envelope;
use super::error::WsError;
use super::transport::{TransportEvents, TransportHandle};

/// Sends `ping` envelopes on a fixed interval while armed.
///
/// The ping task is tied to the [`TransportHandle`] it was armed for: closing that handle stops
/// the task even if [`disarm`](Self::disarm) is never called.
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    token: Option<CancellationToken>,
}

impl HeartbeatScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start pinging through `handle` every `interval`, replacing any previous schedule.
    ///
    /// With a `timeout`, each tick first checks `last_seen`; if the peer has been silent for
    /// longer than `timeout` the scheduler reports [`WsError::HeartbeatTimeout`] through `events`
    /// and stops.
    pub fn arm(
        &mut self,
        handle: &TransportHandle,
        events: TransportEvents,
        interval: Duration,
        timeout: Option<Duration>,
        last_seen: watch::Receiver<Instant>,
    ) {
        self.disarm();

        let token = handle.child_token();
        let outbound = handle.outbound();
        let task_token = token.clone();

        tokio::spawn(async move {
            Self::heartbeat_loop(outbound, events, interval, timeout, last_seen, task_token).await;
        });

        self.token = Some(token);
    }

    pub fn disarm(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.token.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    async fn heartbeat_loop(
        outbound: mpsc::UnboundedSender<String>,
        events: TransportEvents,
        interval: Duration,
        timeout: Option<Duration>,
        last_seen: watch::Receiver<Instant>,
        token: CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        // A stalled runtime yields a single late ping, not a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => break,

                _ = ticker.tick() => {
                    if let Some(timeout) = timeout
                        && last_seen.borrow().elapsed() > timeout
                    {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            generation = events.generation(),
                            "Heartbeat timeout: nothing received within {timeout:?}"
                        );
                        events.errored(WsError::HeartbeatTimeout);
                        break;
                    }

                    let ping = Envelope::ping(Utc::now().timestamp_millis());
                    let frame = match serde_json::to_string(&ping) {
                        Ok(frame) => frame,
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!(error = %e, "Unable to encode ping");
                            #[cfg(not(feature = "tracing"))]
                            let _ = &e;
                            continue;
                        }
                    };

                    if outbound.send(frame).is_err() {
                        // Socket writer has terminated
                        break;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::trace!(generation = events.generation(), "Heartbeat ping sent");
                }
            }
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
