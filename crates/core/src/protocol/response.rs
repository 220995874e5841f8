/// An HTTP response head (RFC 9112 §4).
///
/// Serializes to the standard text format:
///
/// ```text
/// HTTP/1.1 200 OK\r\n
/// Server: mediastream-rs/0.1 DLNADOC/1.50\r\n
/// Content-Type: video/mpeg\r\n
/// Transfer-Encoding: chunked\r\n
/// Connection: keep-alive\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then call
/// [`serialize`](Self::serialize). Media bodies are streamed separately by
/// the caller, so only the head is rendered.
#[must_use]
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        HttpResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replace every header named `name` with a single `name: value`.
    pub fn set_header(mut self, name: &str, value: &str) -> Self {
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.add_header(name, value)
    }

    /// Serialize the head to wire format, ending with the blank line.
    pub fn serialize(&self) -> String {
        let mut response = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        response.push_str("\r\n");
        response
    }
}

/// Canonical reason phrase for the status codes this crate emits.
pub fn reason_phrase(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        206 => "Partial Content",
        400 => "Bad Request",
        404 => "Not Found",
        406 => "Not Acceptable",
        416 => "Requested Range Not Satisfiable",
        501 => "Not Implemented",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
