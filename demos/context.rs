//! Share one connection through a [`ConnectionContext`] and print every status change.
//!
//! ```sh
//! RUST_LOG=info cargo run --example context --features tracing -- ws://localhost:3000/mcp-ws
//! ```

use std::time::Duration;

use realtime_link::context::ConnectionContext;
use realtime_link::ws::{Config, ConnectionManager};
use tokio::time::timeout;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:3000/mcp-ws".to_owned());
    let config = Config::builder()
        .url(url)
        .max_reconnect_attempts(3)
        .reconnect_delay(Duration::from_secs(1))
        .build();

    let context = ConnectionContext::new(ConnectionManager::new(config)?);
    let mut updates = context.subscribe();

    context.connection().connect();

    while let Ok(Ok(())) = timeout(Duration::from_secs(15), updates.changed()).await {
        let snapshot = updates.borrow_and_update().clone();
        info!(
            connected = snapshot.is_connected,
            status = %snapshot.status,
            last_error = ?snapshot.last_error,
            json = %serde_json::to_string(&snapshot)?
        );
    }

    info!("No status change for 15s, exiting");
    Ok(())
}
