//! Plugin facade
//!
//! Initialization, global proxy configuration and the table of operations
//! the daemon host sees. `open` declines non-`http://` URLs without an
//! error, letting the host try another input plugin.

use std::sync::Arc;

use tracing::debug;

use crate::config::network::USER_AGENT;
use crate::config::{ConfigBlock, ProxyConfig};
use crate::engine::backend::{HttpBackend, TransferBackend, TransferRequest};
use crate::error::Result;
use crate::io_thread::IoThread;
use crate::stream::input::{InputStream, StreamShared};

/// Everything a transfer request needs besides the URL.
pub(crate) struct RequestContext {
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
}

impl RequestContext {
    pub fn request(&self, url: &str, range: Option<String>) -> TransferRequest {
        TransferRequest {
            url: url.to_string(),
            user_agent: self.user_agent.clone(),
            proxy: self.proxy.clone(),
            range,
        }
    }
}

/// The operation table an input plugin exposes to the daemon host.
pub trait InputPlugin {
    fn name(&self) -> &'static str;

    /// Open a stream, or `None` when the URL is not for this plugin.
    fn open(&self, url: &str) -> Result<Option<InputStream>>;
}

/// HTTP streaming input.
///
/// Owns the I/O thread and, through it, the process-wide transfer
/// registry. Construct one per process with [`init`](Self::init) and tear
/// it down with [`finish`](Self::finish) after every stream is closed.
pub struct HttpInputPlugin {
    io: Arc<IoThread>,
    context: Arc<RequestContext>,
}

impl HttpInputPlugin {
    /// One-time initialization: resolve proxy settings from the plugin
    /// block (falling back to the legacy global keys) and start the I/O
    /// thread that owns the transfer registry.
    pub fn init(block: &ConfigBlock, global: &ConfigBlock) -> Result<Self> {
        let proxy = ProxyConfig::from_config(block, global)?;
        Self::with_backend(Box::new(HttpBackend::new()), proxy)
    }

    pub(crate) fn with_backend(
        backend: Box<dyn TransferBackend>,
        proxy: Option<ProxyConfig>,
    ) -> Result<Self> {
        let io = IoThread::spawn(backend)?;
        Ok(Self {
            io,
            context: Arc::new(RequestContext {
                user_agent: USER_AGENT.to_string(),
                proxy,
            }),
        })
    }

    /// Open an HTTP stream.
    ///
    /// Returns immediately; the stream becomes ready once the first bytes
    /// or the first error arrive. Non-`http://` URLs yield `Ok(None)`.
    pub fn open(&self, url: &str) -> Result<Option<InputStream>> {
        if !url.starts_with("http://") {
            return Ok(None);
        }

        debug!("opening {url}");
        let shared = Arc::new(StreamShared::new(url));
        let request = self.context.request(url, None);

        let stream = Arc::clone(&shared);
        self.io.call(move |engine| engine.add(&stream, request))?;

        Ok(Some(InputStream::new(
            shared,
            Arc::clone(&self.io),
            Arc::clone(&self.context),
        )))
    }

    /// Tear the plugin down. Every stream must have been closed.
    pub fn finish(self) {
        let active = self.io.call(|engine| engine.active_count());
        assert_eq!(active, 0, "input streams still active at finish");
        self.io.shutdown();
    }
}

impl InputPlugin for HttpInputPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn open(&self, url: &str) -> Result<Option<InputStream>> {
        HttpInputPlugin::open(self, url)
    }
}
