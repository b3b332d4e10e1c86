#![expect(
    clippy::module_name_repetitions,
    reason = "EventDispatcher is the public name used outside this module"
)]

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use super::event::{Event, WILDCARD};

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registration, returned by [`EventDispatcher::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// In-process publish/subscribe registry keyed by channel name.
///
/// Callbacks for a channel run in registration order, followed by every [`WILDCARD`] callback.
/// Each dispatch works on a snapshot of the registry taken when it starts, so callbacks may
/// register or remove listeners (including themselves) while being invoked. A panicking
/// callback is caught and logged; the remaining callbacks still run.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: DashMap<String, Vec<(ListenerId, Callback)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` on `event_type`.
    pub fn on<F>(&self, event_type: &str, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(event_type.to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Register a callback that receives envelope payloads on `event_type` decoded as `T`.
    ///
    /// Events that are not envelopes, or whose payload does not decode, are skipped.
    pub fn on_payload<T, F>(&self, event_type: &str, callback: F) -> ListenerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let channel = event_type.to_owned();
        self.on(event_type, move |event| {
            let Some(envelope) = event.as_envelope() else {
                return;
            };
            match envelope.payload_as::<T>() {
                Ok(payload) => callback(payload),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(channel = %channel, error = %e, "Skipping undecodable payload");
                    #[cfg(not(feature = "tracing"))]
                    let _ = (&channel, &e);
                }
            }
        })
    }

    /// Remove a registration. Returns `false` if it was not registered on `event_type`.
    pub fn off(&self, event_type: &str, id: ListenerId) -> bool {
        let removed = self
            .listeners
            .get_mut(event_type)
            .is_some_and(|mut callbacks| {
                let before = callbacks.len();
                callbacks.retain(|(existing, _)| *existing != id);
                callbacks.len() != before
            });
        self.listeners
            .remove_if(event_type, |_, callbacks| callbacks.is_empty());
        removed
    }

    /// Invoke every callback for `event_type`, then every wildcard callback.
    pub fn dispatch(&self, event_type: &str, event: &Event) {
        let mut callbacks = self.snapshot(event_type);
        if event_type != WILDCARD {
            callbacks.extend(self.snapshot(WILDCARD));
        }

        for callback in callbacks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    event_type,
                    panic = panic_message(panic.as_ref()),
                    "Listener panicked"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = panic_message(panic.as_ref());
            }
        }
    }

    /// Number of callbacks registered directly on `event_type`.
    #[must_use]
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).map_or(0, |callbacks| callbacks.len())
    }

    fn snapshot(&self, event_type: &str) -> Vec<Callback> {
        self.listeners
            .get(event_type)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.listeners {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
