//! Error types for the media stream library.

use std::fmt;

/// Errors that can occur while managing media stream sessions.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Connection**: [`Connection`](Self::Connection),
///   [`InvalidUrl`](Self::InvalidUrl): upstream unreachable or malformed.
/// - **Transport**: [`Transport`](Self::Transport): read/write failure on an
///   established connection. The stream is closed when this is returned.
/// - **Lifecycle**: [`NotOpen`](Self::NotOpen), [`AlreadyOpen`](Self::AlreadyOpen),
///   [`HeaderNotSent`](Self::HeaderNotSent),
///   [`DoubleRelease`](Self::DoubleRelease), [`InUse`](Self::InUse),
///   [`SessionNotFound`](Self::SessionNotFound).
/// - **Timing**: [`PtsNotAvailable`](Self::PtsNotAvailable).
/// - **Recordings**: [`RecordNotFound`](Self::RecordNotFound).
/// - **Protocol**: [`Parse`](Self::Parse), [`InvalidHeader`](Self::InvalidHeader),
///   [`RangeNotSatisfiable`](Self::RangeNotSatisfiable).
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Upstream could not be reached or refused the request.
    #[error("connection error: {0}")]
    Connection(String),

    /// URL is malformed, uses an unsupported scheme or exceeds 1024 bytes.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation on a stream that is not opened yet or already closed.
    #[error("stream not open")]
    NotOpen,

    /// `open()` on a stream that is already open, or an identity change
    /// after open.
    #[error("stream already open")]
    AlreadyOpen,

    /// Body bytes requested before the response head went out.
    #[error("response head not sent")]
    HeaderNotSent,

    /// `release()` without a matching `request()`.
    #[error("release without matching request on session {session_id}")]
    DoubleRelease { session_id: u64 },

    /// Session cannot be destroyed while holders still reference it.
    #[error("session {session_id} still in use ({count} holders)")]
    InUse { session_id: u64, count: u32 },

    /// No session with the given ID exists in the [`SessionRegistry`](crate::session::SessionRegistry).
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Elapsed time or duration queried before any PTS was observed.
    #[error("PTS not available")]
    PtsNotAvailable,

    /// Recording store has no entry for this recording id.
    #[error("recording not found: {0}")]
    RecordNotFound(i64),

    /// Underlying I/O or socket error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Failed to parse an HTTP message head.
    #[error("HTTP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A requested byte range cannot be represented.
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// A header line passed to `set_header` is not `Name: value`.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of HTTP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Message head exceeded the maximum accepted size.
    HeadTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::HeadTooLarge => write!(f, "message head too large"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
