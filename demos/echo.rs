//! Connect to a server, log every lifecycle event and inbound message, and send a few
//! envelopes.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example echo --features tracing -- http://localhost:3000
//! ```

use std::time::Duration;

use realtime_link::endpoint;
use realtime_link::ws::event::{CLOSE, ERROR, MESSAGE, OPEN, RECONNECTING};
use realtime_link::ws::{ConnectionManager, Envelope, Event};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let origin = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_owned());
    let config = endpoint::config_for_origin(&origin)?;
    info!(url = %config.url, "Using endpoint");

    let connection = ConnectionManager::new(config)?;

    connection.on(OPEN, |_event| info!(event = OPEN));
    connection.on(CLOSE, |event| {
        if let Event::Close(info) = event {
            info!(event = CLOSE, %info);
        }
    });
    connection.on(ERROR, |event| {
        if let Some(error) = event.as_error() {
            warn!(event = ERROR, %error);
        }
    });
    connection.on(RECONNECTING, |event| {
        if let Event::Reconnecting { attempt, delay } = event {
            info!(event = RECONNECTING, attempt, ?delay);
        }
    });
    connection.on(MESSAGE, |event| match event {
        Event::Message(envelope) => info!(event = MESSAGE, msg_type = %envelope.msg_type, payload = %envelope.payload),
        Event::Raw(text) => info!(event = MESSAGE, raw = %text),
        _ => {}
    });

    connection.connect();

    for sequence in 0..5 {
        sleep(Duration::from_secs(2)).await;
        let sent = connection.send(&Envelope::new("echo", json!({ "sequence": sequence })));
        info!(sequence, sent, state = %connection.state());
    }

    connection.disconnect();
    Ok(())
}
