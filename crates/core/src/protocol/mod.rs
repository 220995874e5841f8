//! HTTP/DLNA signaling used by media streams.
//!
//! Media is requested and served over plain HTTP/1.1 with DLNA extension
//! headers:
//!
//! ```text
//! GET /vldms/tuner?ocap_locator=ocap://0x2 HTTP/1.1\r\n
//! Host: 10.0.0.2:8080\r\n
//! TimeSeekRange.dlna.org: npt=30.000-\r\n
//! \r\n
//! ```
//!
//! Only message heads are parsed. Bodies are media bytes and flow through
//! the stream's transport untouched.

pub mod dlna;
pub mod request;
pub mod response;
pub mod url;

use std::io::BufRead;

use crate::error::{ParseErrorKind, Result, StreamError};

pub use request::{HttpRequest, ResponseHead};
pub use response::HttpResponse;
pub use url::MediaUrl;

/// Largest message head accepted from a peer.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// Read one message head (start line and headers, through the blank line).
///
/// Returns `Ok(None)` if the peer closed the connection before sending
/// anything.
pub fn read_head<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            if head.trim().is_empty() {
                return Ok(None);
            }
            return Err(StreamError::Parse {
                kind: ParseErrorKind::EmptyMessage,
            });
        }

        // Tolerate stray CRLFs before the start line (RFC 9112 §2.2).
        if head.is_empty() && line.trim().is_empty() {
            continue;
        }

        head.push_str(&line);
        if head.len() > MAX_HEAD_LEN {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::HeadTooLarge,
            });
        }
        if line == "\r\n" || line == "\n" {
            return Ok(Some(head));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn read_head_stops_at_blank_line() {
        let mut reader = BufReader::new(Cursor::new(
            "\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\nBODY".as_bytes(),
        ));
        let head = read_head(&mut reader).unwrap().unwrap();
        assert_eq!(head, "GET / HTTP/1.1\r\nHost: a\r\n\r\n");

        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "BODY");
    }

    #[test]
    fn read_head_on_closed_peer() {
        let mut reader = BufReader::new(Cursor::new(&b""[..]));
        assert!(read_head(&mut reader).unwrap().is_none());
    }

    #[test]
    fn read_head_truncated() {
        let mut reader = BufReader::new(Cursor::new(&b"GET / HTTP/1.1\r\nHost"[..]));
        assert!(read_head(&mut reader).is_err());
    }
}
