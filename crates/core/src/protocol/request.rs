use crate::error::{ParseErrorKind, Result, StreamError};

/// A parsed HTTP request head (RFC 9112 §3).
///
/// ```text
/// Method SP Request-URI SP HTTP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive. Bodies are never read; media
/// requests (`GET`, `HEAD`) do not carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method (`GET`, `HEAD`, ...).
    pub method: String,
    /// Request target: an absolute URL for upstream requests, an
    /// origin-form path for client requests.
    pub uri: String,
    /// Protocol version (`HTTP/1.0` or `HTTP/1.1`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// A bodiless `HTTP/1.1` request with no headers.
    pub fn new(method: &str, uri: &str) -> Self {
        HttpRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new("GET", uri)
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Parse a request head from its text representation.
    ///
    /// Expects the request line followed by headers; parsing stops at the
    /// first blank line. Returns [`StreamError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("HTTP/") {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        Ok(HttpRequest {
            method: parts[0].to_string(),
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers: parse_headers(lines)?,
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Origin-form request target: path plus query string.
    pub fn target(&self) -> &str {
        if self.uri.starts_with('/') {
            return &self.uri;
        }
        match self.uri.split_once("://") {
            Some((_, rest)) => rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/"),
            None => &self.uri,
        }
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Persistent-connection eligibility (RFC 9112 §9.3).
    ///
    /// HTTP/1.1 defaults to keep-alive unless the client sends
    /// `Connection: close`; HTTP/1.0 requires an explicit
    /// `Connection: keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        let connection = self.get_header("Connection");
        let has_token = |token: &str| {
            connection.is_some_and(|value| {
                value
                    .split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case(token))
            })
        };

        if self.version.eq_ignore_ascii_case("HTTP/1.1") {
            !has_token("close")
        } else {
            has_token("keep-alive")
        }
    }
}

/// Response head of an upstream server, reduced to what a stream needs.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status_code: u16, reason: &str) -> Self {
        ResponseHead {
            status_code,
            reason: reason.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get_header("Content-Length")?.parse().ok()
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            break;
        }

        let colon_pos = line.find(':').ok_or(StreamError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();

        headers.push((name, value));
    }

    Ok(headers)
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
