use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use reqwest::Method;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::{Connector, Transport, Upstream};
use crate::config::StreamerConfig;
use crate::error::{Result, StreamError};
use crate::protocol::{HttpRequest, MediaUrl, ResponseHead};
use crate::session::StreamType;

/// HTTP/1.1 upstream connector backed by a blocking `reqwest` client.
///
/// The client timeout bounds connecting and every body read, so a stalled
/// upstream surfaces as a read error rather than a hung session.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(config: &StreamerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(config.server_agent.as_str())
            .http1_title_case_headers()
            .no_proxy()
            .build()
            .map_err(|e| StreamError::Connection(format!("HTTP client setup: {}", e)))?;
        Ok(Self { client })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, request: &HttpRequest) -> Result<Upstream> {
        let url = MediaUrl::parse(&request.uri).map_err(|e| StreamError::Connection(e.to_string()))?;
        if url.stream_type != StreamType::Http {
            return Err(StreamError::Connection(format!(
                "unsupported upstream scheme: {}",
                request.uri
            )));
        }
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| StreamError::Connection(format!("bad method: {}", request.method)))?;

        tracing::debug!(url = %request.uri, method = %request.method, "upstream request");
        let response = self
            .client
            .request(method, url.as_url().clone())
            .headers(forwarded_headers(request))
            .send()
            .map_err(|e| StreamError::Connection(format!("{}: {}", request.uri, e)))?;

        let status = response.status();
        tracing::debug!(url = %request.uri, status = status.as_u16(), "upstream response");
        if !status.is_success() {
            return Err(StreamError::Connection(format!("upstream returned {}", status)));
        }

        Ok(Upstream {
            head: response_head(&response),
            body: Arc::new(HttpBody {
                response: Mutex::new(Some(response)),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

/// Headers the client manages itself; caller values are dropped.
fn is_hop_header(name: &str) -> bool {
    ["Host", "Connection", "User-Agent", "Content-Length", "Transfer-Encoding"]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn forwarded_headers(request: &HttpRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        if is_hop_header(name) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "dropping unrepresentable header"),
        }
    }
    headers
}

fn response_head(response: &Response) -> ResponseHead {
    let status = response.status();
    let mut head = ResponseHead::new(status.as_u16(), status.canonical_reason().unwrap_or(""));
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            head = head.add_header(name.as_str(), value);
        }
    }
    head
}

/// Response body of an upstream request.
struct HttpBody {
    response: Mutex<Option<Response>>,
    closed: AtomicBool,
}

impl Transport for HttpBody {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut response = self.response.lock();
        let n = match response.as_mut() {
            Some(body) => body.read(buf)?,
            None => return Ok(0),
        };
        if self.closed.load(Ordering::SeqCst) {
            response.take();
            return Ok(0);
        }
        Ok(n)
    }

    fn write_all(&self, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "upstream body is read-only",
        ))
    }

    /// Drops the response, or leaves that to a reader blocked in it; the
    /// client timeout bounds how long that reader can stay blocked.
    fn shutdown(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut response) = self.response.try_lock() {
            response.take();
        }
        Ok(())
    }
}
