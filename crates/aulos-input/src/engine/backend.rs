//! Transfer backend seam
//!
//! One backend launch drives one HTTP transfer on its own worker thread
//! and reports what happened over the shared event channel, in order:
//! `Status`, any number of `Header` lines, then `Chunk`s, then `Done`.
//! After each chunk the worker blocks until the engine acknowledges it;
//! a chunk the engine rejects for backpressure is re-delivered on resume,
//! so the withheld acknowledgement is the pause sentinel.
//!
//! Backends normalize the legacy `ICY 200 OK` status line to status 200.
//! The production backend speaks standard HTTP/1.x through reqwest, so
//! the alias only matters at this seam (scripted backends exercise it).

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::config::network::{CONNECT_TIMEOUT_SECS, MAX_REDIRECTS, TRANSFER_CHUNK_SIZE};
use crate::config::ProxyConfig;
use crate::error::{InputError, Result};

/// Identifies one transfer in the registry; the engine's lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferId(pub u64);

/// Everything a transfer needs besides the connection itself.
#[derive(Debug, Clone)]
pub(crate) struct TransferRequest {
    pub url: String,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
    /// Range suffix ("<offset>-") for a seek-induced reopen.
    pub range: Option<String>,
}

/// Acknowledgement for a delivered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkAck {
    Continue,
}

/// Events a transfer worker reports to the I/O thread.
#[derive(Debug)]
pub(crate) enum TransferEvent {
    Status {
        id: TransferId,
        code: u16,
    },
    Header {
        id: TransferId,
        line: Vec<u8>,
    },
    Chunk {
        id: TransferId,
        data: Vec<u8>,
    },
    Done {
        id: TransferId,
        result: std::result::Result<(), String>,
    },
}

/// Channel ends handed to a transfer worker.
pub(crate) struct TransferLink {
    pub events: Sender<TransferEvent>,
    pub ack: Receiver<ChunkAck>,
    pub cancelled: Arc<AtomicBool>,
}

pub(crate) trait TransferBackend: Send {
    /// Start the transfer on a worker thread.
    ///
    /// Fails if the client cannot be built or the worker cannot be
    /// spawned; nothing must have been sent on `link` in that case.
    fn launch(&self, id: TransferId, request: TransferRequest, link: TransferLink) -> Result<()>;
}

/// Production backend: a blocking reqwest client per transfer.
pub(crate) struct HttpBackend;

impl HttpBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TransferBackend for HttpBackend {
    fn launch(&self, id: TransferId, request: TransferRequest, link: TransferLink) -> Result<()> {
        let client = build_client(&request)?;
        thread::Builder::new()
            .name(format!("http-transfer-{}", id.0))
            .spawn(move || run_transfer(client, request, id, link))
            .map_err(|err| {
                InputError::Transfer(format!("failed to spawn transfer thread: {err}"))
            })?;
        Ok(())
    }
}

fn build_client(request: &TransferRequest) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(request.user_agent.clone())
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        // streams play for hours; only the connect phase is bounded
        .timeout(None);

    if let Some(proxy) = &request.proxy {
        let mut http_proxy = reqwest::Proxy::http(proxy.url())
            .map_err(|err| InputError::Transfer(format!("invalid proxy: {err}")))?;
        if let (Some(user), Some(password)) = (&proxy.user, &proxy.password) {
            http_proxy = http_proxy.basic_auth(user, password);
        }
        builder = builder.proxy(http_proxy);
    }

    builder
        .build()
        .map_err(|err| InputError::Transfer(format!("failed to build HTTP client: {err}")))
}

fn run_transfer(
    client: reqwest::blocking::Client,
    request: TransferRequest,
    id: TransferId,
    link: TransferLink,
) {
    let mut builder = client.get(&request.url).header("Icy-Metadata", "1");
    if let Some(range) = &request.range {
        builder = builder.header(reqwest::header::RANGE, format!("bytes={range}"));
    }

    let mut response = match builder.send() {
        Ok(response) => response,
        Err(err) => {
            let _ = link.events.send(TransferEvent::Done {
                id,
                result: Err(err.to_string()),
            });
            return;
        }
    };

    let code = response.status().as_u16();
    if link.events.send(TransferEvent::Status { id, code }).is_err() {
        return;
    }

    for (name, value) in response.headers() {
        let mut line = name.as_str().as_bytes().to_vec();
        line.extend_from_slice(b": ");
        line.extend_from_slice(value.as_bytes());
        if link.events.send(TransferEvent::Header { id, line }).is_err() {
            return;
        }
    }

    if !(200..300).contains(&code) {
        // error responses carry no usable body; report completion and
        // let the engine classify the status
        let _ = link.events.send(TransferEvent::Done { id, result: Ok(()) });
        return;
    }

    let mut chunk = vec![0u8; TRANSFER_CHUNK_SIZE];
    loop {
        if link.cancelled.load(Ordering::Relaxed) {
            debug!("transfer {} cancelled", id.0);
            return;
        }

        match response.read(&mut chunk) {
            Ok(0) => {
                let _ = link.events.send(TransferEvent::Done { id, result: Ok(()) });
                return;
            }
            Ok(n) => {
                let data = chunk[..n].to_vec();
                if link.events.send(TransferEvent::Chunk { id, data }).is_err() {
                    return;
                }
                // the ack is withheld while the stream is paused
                if link.ack.recv().is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("transfer {} read failed: {err}", id.0);
                let _ = link.events.send(TransferEvent::Done {
                    id,
                    result: Err(err.to_string()),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(proxy: Option<ProxyConfig>) -> TransferRequest {
        TransferRequest {
            url: "http://host/stream".to_string(),
            user_agent: "test agent".to_string(),
            proxy,
            range: None,
        }
    }

    #[test]
    fn client_builds_without_proxy() {
        assert!(build_client(&request(None)).is_ok());
    }

    #[test]
    fn client_builds_with_proxy_auth() {
        let proxy = ProxyConfig {
            host: "proxy.example.com".to_string(),
            port: Some(3128),
            user: Some("alice".to_string()),
            password: Some("secret".to_string()),
        };
        assert!(build_client(&request(Some(proxy))).is_ok());
    }

    #[test]
    fn invalid_proxy_is_a_transfer_error() {
        let proxy = ProxyConfig {
            host: "not a host name".to_string(),
            port: None,
            user: None,
            password: None,
        };
        match build_client(&request(Some(proxy))) {
            Err(InputError::Transfer(_)) => {}
            other => panic!("expected Transfer error, got {other:?}"),
        }
    }

    #[test]
    fn transfer_ids_compare_by_value() {
        assert_eq!(TransferId(3), TransferId(3));
        assert_ne!(TransferId(3), TransferId(4));
    }
}
