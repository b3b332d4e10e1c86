//! Derive a WebSocket endpoint from the origin an application is served from.
//!
//! A page loaded over `https` talks to `wss`, anything else to `ws`, on the same host and
//! port:
//!
//! ```
//! use realtime_link::endpoint;
//!
//! let url = endpoint::websocket_url("https://app.example.com", endpoint::DEFAULT_PATH).unwrap();
//! assert_eq!(url.as_str(), "wss://app.example.com/mcp-ws");
//! ```

use url::Url;

use crate::Result;
use crate::error::Error;
use crate::ws::Config;

/// Path of the WebSocket route in the reference deployment.
pub const DEFAULT_PATH: &str = "/mcp-ws";

/// Build the WebSocket URL for `path` on the host serving `origin`.
///
/// `origin` may be an `http`, `https`, `ws` or `wss` URL; its path, query and fragment are
/// discarded.
pub fn websocket_url(origin: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(origin)?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::validation(format!(
                "unsupported origin scheme `{other}`, expected http, https, ws or wss"
            )));
        }
    };

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation(format!("origin `{origin}` has no host")));
    }

    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("unable to switch `{origin}` to {scheme}")))?;
    // Credentials in the origin are not forwarded to the socket
    _ = url.set_username("");
    _ = url.set_password(None);
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Default [`Config`] for the [`DEFAULT_PATH`] endpoint on `origin`.
pub fn config_for_origin(origin: &str) -> Result<Config> {
    let url = websocket_url(origin, DEFAULT_PATH)?;
    Ok(Config::new(url))
}
