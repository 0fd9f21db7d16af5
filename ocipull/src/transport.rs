//! HTTP transport shared by every registry call.
//!
//! A single [`HttpTransport`] is built once from [`Config`](crate::Config)
//! (proxy, global deadline) and handed to the token provider, the manifest
//! fetcher and the blob writer. The [`Transport`] trait is the seam that
//! lets tests substitute an in-memory registry.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Config, Error, Result};

/// Issues `GET` requests against a registry.
pub trait Transport {
    /// Performs a `GET` with the given extra headers.
    ///
    /// Non-success statuses are returned as a [`Response`], not an error;
    /// only connection-level failures become [`Error::Http`].
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response>;
}

/// A response whose body has not been consumed yet.
pub struct Response {
    status: u16,
    content_type: Option<String>,
    body: Box<dyn Read>,
}

impl Response {
    /// Wraps a status, optional `Content-Type` and a body stream.
    pub fn new(status: u16, content_type: Option<String>, body: impl Read + 'static) -> Self {
        Self {
            status,
            content_type,
            body: Box::new(body),
        }
    }

    /// Builds a response from an in-memory body.
    pub fn from_bytes(status: u16, content_type: Option<&str>, body: Vec<u8>) -> Self {
        Self::new(status, content_type.map(str::to_owned), io::Cursor::new(body))
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Media type from the `Content-Type` header, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
            .filter(|ct| !ct.is_empty())
    }

    /// Consumes the response, returning the raw body stream.
    pub fn into_reader(self) -> Box<dyn Read> {
        self.body
    }

    /// Reads the whole body into memory, byte for byte.
    pub fn read_to_vec(mut self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        self.body.read_to_end(&mut body)?;
        Ok(body)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Cooperative cancellation flag shared between the caller and a pull.
///
/// Once cancelled, the next request and the next body chunk fail with
/// [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for registration with signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    /// Fails with [`Error::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// [`Transport`] backed by a single `ureq` agent.
#[derive(Debug)]
pub struct HttpTransport {
    agent: ureq::Agent,
    cancel: CancelToken,
}

impl HttpTransport {
    /// Builds the agent from the proxy and timeout settings in `config`.
    ///
    /// The timeout bounds connecting and waiting for the response headers.
    /// Body reads have no deadline, so a large blob that keeps streaming is
    /// never cut off; a stalled body is aborted through the [`CancelToken`].
    /// The proxy is taken from `config` only; the environment is not
    /// consulted again here.
    pub fn new(config: &Config, cancel: CancelToken) -> Result<Self> {
        let proxy = config
            .proxy
            .as_deref()
            .map(ureq::Proxy::new)
            .transpose()
            .map_err(|e| Error::Http(format!("invalid proxy URL: {e}")))?;

        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(config.timeout)
            .timeout_recv_response(config.timeout)
            .proxy(proxy)
            .build();

        Ok(Self {
            agent: ureq::Agent::new_with_config(agent_config),
            cancel,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<Response> {
        self.cancel.check()?;

        let mut req = self.agent.get(url);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let resp = req
            .call()
            .map_err(|e| Error::Http(format!("GET {url}: {e}")))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(Response::new(
            status,
            content_type,
            resp.into_body().into_reader(),
        ))
    }
}
