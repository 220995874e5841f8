//! Media streams: the capability interface and its two variants.
//!
//! [`MediaStream`] is what the registry and control plane see. Each variant
//! composes a [`StreamSession`] for the shared lifecycle, usage count, PTS
//! and trick-play state, and adds its own transport handling:
//!
//! - [`InputMediaStream`]: pulls media from an upstream URL.
//! - [`OutputMediaStream`]: pushes media to a connected client and owns the
//!   HTTP/DLNA response head.

pub mod input;
pub mod output;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::protocol::HttpRequest;
use crate::session::StreamSession;
use crate::transport::Transport;

pub use input::{InputMediaStream, InputReader};
pub use output::OutputMediaStream;

/// Operations shared by every stream kind.
pub trait MediaStream: Send + Sync {
    fn session(&self) -> &StreamSession;

    /// Establish the stream's connection. Valid only in `Init`.
    fn open(&self, request: &StreamRequest) -> Result<()>;

    /// Close the stream. Idempotent.
    fn close(&self) -> Result<()>;

    /// Move up to `buf.len()` bytes. `Ok(0)` is end of stream, which is
    /// also what every read after `close()` returns.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Refresh PTS state from the stream's timestamp source.
    fn update_pts(&self) -> Option<u32> {
        self.session().update_pts()
    }

    fn elapsed_time(&self, cur_pts: u32) -> Result<u32> {
        self.session().elapsed_time(cur_pts)
    }

    fn media_duration(&self) -> Result<u32> {
        self.session().media_duration()
    }

    /// Identity of the peer device, for streams that have one.
    fn client_id(&self) -> Option<ClientId> {
        None
    }
}

/// The request a stream is opened with.
///
/// Input streams forward `request`'s headers upstream. Output streams bind
/// to the `client` connection the request arrived on.
pub struct StreamRequest {
    pub request: HttpRequest,
    pub client: Option<ClientConnection>,
}

impl StreamRequest {
    pub fn upstream(request: HttpRequest) -> Self {
        Self {
            request,
            client: None,
        }
    }

    pub fn client(request: HttpRequest, client: ClientConnection) -> Self {
        Self {
            request,
            client: Some(client),
        }
    }
}

/// A client connection accepted by the server.
#[derive(Clone)]
pub struct ClientConnection {
    pub peer_addr: SocketAddr,
    pub conn_id: u64,
    pub transport: Arc<dyn Transport>,
}

/// Identity of a client device on an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId {
    /// Stable per client address.
    pub uuid: Uuid,
    pub ip_addr: IpAddr,
    /// Session number of this stream within the client.
    pub session_num: u64,
}

impl ClientId {
    pub fn for_peer(ip_addr: IpAddr, session_num: u64) -> Self {
        Self {
            uuid: Uuid::new_v5(&Uuid::NAMESPACE_OID, ip_addr.to_string().as_bytes()),
            ip_addr,
            session_num,
        }
    }

    pub fn uuid_bytes(&self) -> [u8; 16] {
        *self.uuid.as_bytes()
    }
}
