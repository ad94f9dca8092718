//! Configuration for the HTTP input core
//!
//! Engine constants, plus the plugin's block options (proxy settings) and
//! their legacy global fallbacks.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{InputError, Result};

/// Network-related configuration
pub mod network {
    /// User agent for HTTP requests
    pub const USER_AGENT: &str =
        concat!("Music Player Daemon ", env!("CARGO_PKG_VERSION"));

    /// Connection timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Maximum number of redirects followed per transfer
    pub const MAX_REDIRECTS: usize = 5;

    /// Chunk size for transfer reads from the network (bytes)
    pub const TRANSFER_CHUNK_SIZE: usize = 8 * 1024;
}

/// Stream buffer configuration (flow control between the transfer worker
/// and the consumer)
pub mod buffer {
    /// Do not buffer more than this number of bytes per stream. A chunk
    /// that would push the buffer past this level pauses the transfer
    /// instead of being appended.
    pub const HIGH_WATERMARK: usize = 512 * 1024;

    /// Resume a paused transfer once the buffer drains below this level.
    pub const RESUME_AT: usize = 384 * 1024;
}

/// One block of `key value` options from the daemon configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ConfigBlock {
    values: BTreeMap<String, String>,
}

impl ConfigBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mainly for tests and embedders.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up an unsigned option. A present but unparsable value is a
    /// configuration error, not a silent default.
    pub fn get_unsigned(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| {
                    InputError::Config(format!("\"{key}\" must be an unsigned integer, got \"{raw}\""))
                }),
        }
    }
}

/// HTTP proxy settings for outgoing transfers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Resolve proxy settings from the plugin block, falling back to the
    /// legacy global `http_proxy_*` keys when the block carries none.
    ///
    /// A configured port of 0 counts as unset. On the legacy path a
    /// missing password defaults to the empty string (a user without a
    /// password still produces basic auth).
    pub fn from_config(block: &ConfigBlock, global: &ConfigBlock) -> Result<Option<Self>> {
        if let Some(host) = block.get("proxy") {
            return Ok(Some(Self {
                host: host.to_string(),
                port: port_option(block.get_unsigned("proxy_port")?)?,
                user: block.get("proxy_user").map(str::to_string),
                password: block.get("proxy_password").map(str::to_string),
            }));
        }

        if let Some(host) = global.get("http_proxy_host") {
            return Ok(Some(Self {
                host: host.to_string(),
                port: port_option(global.get_unsigned("http_proxy_port")?)?,
                user: global.get("http_proxy_user").map(str::to_string),
                password: Some(
                    global.get("http_proxy_password").unwrap_or("").to_string(),
                ),
            }));
        }

        Ok(None)
    }

    /// Proxy URL for the HTTP client.
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.host, port),
            None => format!("http://{}", self.host),
        }
    }
}

fn port_option(raw: Option<u64>) -> Result<Option<u16>> {
    match raw {
        None | Some(0) => Ok(None),
        Some(port) => u16::try_from(port)
            .map(Some)
            .map_err(|_| InputError::Config(format!("proxy port {port} out of range"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- ConfigBlock ---

    #[test]
    fn get_returns_inserted_value() {
        let block = ConfigBlock::new().with("proxy", "proxy.example.com");
        assert_eq!(block.get("proxy"), Some("proxy.example.com"));
        assert_eq!(block.get("missing"), None);
    }

    #[test]
    fn get_unsigned_parses() {
        let block = ConfigBlock::new().with("proxy_port", "8080");
        assert_eq!(block.get_unsigned("proxy_port").unwrap(), Some(8080));
        assert_eq!(block.get_unsigned("missing").unwrap(), None);
    }

    #[test]
    fn get_unsigned_rejects_garbage() {
        let block = ConfigBlock::new().with("proxy_port", "yes");
        assert!(block.get_unsigned("proxy_port").is_err());
    }

    // --- ProxyConfig resolution ---

    #[test]
    fn no_proxy_configured() {
        let proxy =
            ProxyConfig::from_config(&ConfigBlock::new(), &ConfigBlock::new()).unwrap();
        assert!(proxy.is_none());
    }

    #[test]
    fn block_proxy_takes_precedence() {
        let block = ConfigBlock::new()
            .with("proxy", "block.example.com")
            .with("proxy_port", "3128")
            .with("proxy_user", "alice")
            .with("proxy_password", "secret");
        let global = ConfigBlock::new().with("http_proxy_host", "legacy.example.com");

        let proxy = ProxyConfig::from_config(&block, &global).unwrap().unwrap();
        assert_eq!(proxy.host, "block.example.com");
        assert_eq!(proxy.port, Some(3128));
        assert_eq!(proxy.user.as_deref(), Some("alice"));
        assert_eq!(proxy.password.as_deref(), Some("secret"));
    }

    #[test]
    fn legacy_keys_used_when_block_empty() {
        let global = ConfigBlock::new()
            .with("http_proxy_host", "legacy.example.com")
            .with("http_proxy_port", "8123")
            .with("http_proxy_user", "bob");

        let proxy = ProxyConfig::from_config(&ConfigBlock::new(), &global)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.host, "legacy.example.com");
        assert_eq!(proxy.port, Some(8123));
        assert_eq!(proxy.user.as_deref(), Some("bob"));
        // legacy password defaults to the empty string
        assert_eq!(proxy.password.as_deref(), Some(""));
    }

    #[test]
    fn block_proxy_without_password_stays_none() {
        let block = ConfigBlock::new().with("proxy", "p.example.com");
        let proxy = ProxyConfig::from_config(&block, &ConfigBlock::new())
            .unwrap()
            .unwrap();
        assert_eq!(proxy.password, None);
    }

    #[test]
    fn zero_port_counts_as_unset() {
        let block = ConfigBlock::new()
            .with("proxy", "p.example.com")
            .with("proxy_port", "0");
        let proxy = ProxyConfig::from_config(&block, &ConfigBlock::new())
            .unwrap()
            .unwrap();
        assert_eq!(proxy.port, None);
        assert_eq!(proxy.url(), "http://p.example.com");
    }

    #[test]
    fn proxy_url_includes_port() {
        let proxy = ProxyConfig {
            host: "p.example.com".to_string(),
            port: Some(3128),
            user: None,
            password: None,
        };
        assert_eq!(proxy.url(), "http://p.example.com:3128");
    }

    #[test]
    fn out_of_range_port_is_an_error() {
        let block = ConfigBlock::new()
            .with("proxy", "p.example.com")
            .with("proxy_port", "70000");
        assert!(ProxyConfig::from_config(&block, &ConfigBlock::new()).is_err());
    }
}
