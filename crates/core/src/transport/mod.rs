//! Network transport seams.
//!
//! Streams never touch sockets directly. They go through two traits:
//!
//! - [`Transport`]: a connected byte stream (client socket or upstream body).
//!   Methods take `&self` so one thread can block in `read` while another
//!   calls `shutdown` to end it.
//!
//! - [`Connector`]: opens an upstream media URL and returns its response
//!   head plus body transport.
//!
//! [`http::HttpConnector`] pulls over HTTP/1.1 with `reqwest`; [`tcp`] carries the
//! accept loop used by the relay server.

pub mod http;
pub mod tcp;

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{HttpRequest, ResponseHead};

pub use http::HttpConnector;

/// A connected byte stream.
pub trait Transport: Send + Sync {
    /// Blocking read; `Ok(0)` is end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Close both directions, waking any blocked reader.
    fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream: &TcpStream = self;
        Read::read(&mut stream, buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream: &TcpStream = self;
        Write::write_all(&mut stream, buf)?;
        Write::flush(&mut stream)
    }

    fn shutdown(&self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// An opened upstream: response head plus body.
pub struct Upstream {
    pub head: ResponseHead,
    pub body: Arc<dyn Transport>,
}

/// Opens upstream media URLs.
pub trait Connector: Send + Sync {
    /// Send `request` (absolute URI) and return the upstream once a
    /// successful response head has arrived.
    ///
    /// Unreachable hosts, malformed URLs and non-2xx answers are reported
    /// as [`StreamError::Connection`](crate::StreamError::Connection).
    fn connect(&self, request: &HttpRequest) -> Result<Upstream>;
}
