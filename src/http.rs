//! The shared blocking HTTP client.

use std::time::Duration;

use reqwest::blocking::Client;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// One client for the feed, the archive, and the store, with a hard
/// per-request timeout.
pub fn client(timeout_secs: u64) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(30)))
        .build()
}
