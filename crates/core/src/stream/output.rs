use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{ClientConnection, ClientId, MediaStream, StreamRequest};
use crate::config::StreamerConfig;
use crate::error::{Result, StreamError};
use crate::notify::{SessionDone, StreamEvent};
use crate::protocol::{HttpRequest, HttpResponse, dlna};
use crate::recording::RecordingStore;
use crate::session::{SessionRegistry, StreamDir, StreamSession, StreamState, StreamType};
use crate::transport::Transport;
use crate::trickplay::SeekSupport;

/// Egress stream delivering media to one client connection.
///
/// The response head is written either directly through
/// [`send_http_response_header`](Self::send_http_response_header) or by the
/// notifier thread on [`StreamEvent::HeaderReady`]. Body bytes go out through
/// [`read`](MediaStream::read), which pulls from the attached source; the
/// head must have been sent first. Closing the stream shuts the source down.
pub struct OutputMediaStream {
    session: StreamSession,
    config: StreamerConfig,
    store: Option<Arc<dyn RecordingStore>>,
    conn: Mutex<ConnState>,
    head_sent: Condvar,
    source: Mutex<Option<Arc<dyn Transport>>>,
}

struct ConnState {
    request: Option<HttpRequest>,
    client: Option<ClientConnection>,
    content_length: Option<u64>,
    seek_support: SeekSupport,
    /// Headers set by the owner; they replace generated ones of the same name.
    extra_headers: Vec<(String, String)>,
    /// Owner closes the connection after this response.
    close_after: bool,
    header_sent: bool,
    /// Body is framed with chunked transfer coding.
    chunked: bool,
    closed: bool,
}

impl OutputMediaStream {
    pub fn new(
        registry: &SessionRegistry,
        stream_type: StreamType,
        url: &str,
        config: &StreamerConfig,
    ) -> Result<Self> {
        Ok(Self {
            session: StreamSession::new(registry, stream_type, StreamDir::Output, url)?,
            config: config.clone(),
            store: None,
            conn: Mutex::new(ConnState {
                request: None,
                client: None,
                content_length: None,
                seek_support: config.seek_support,
                extra_headers: Vec::new(),
                close_after: false,
                header_sent: false,
                chunked: false,
                closed: false,
            }),
            head_sent: Condvar::new(),
            source: Mutex::new(None),
        })
    }

    pub fn with_recording_store(mut self, store: Arc<dyn RecordingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Media source drained by `read`.
    pub fn attach_source(&self, source: Arc<dyn Transport>) {
        *self.source.lock() = Some(source);
    }

    pub fn set_seek_support(&self, seek_support: SeekSupport) {
        self.conn.lock().seek_support = seek_support;
    }

    pub fn seek_support(&self) -> SeekSupport {
        self.conn.lock().seek_support
    }

    /// Body length announced in the response head. Unknown lengths are
    /// sent chunked to HTTP/1.1 clients.
    pub fn set_content_length(&self, content_length: Option<u64>) {
        self.conn.lock().content_length = content_length;
    }

    /// Add `name: value` to the response head, replacing any header of
    /// that name the stream would generate itself.
    pub fn add_response_header(&self, name: &str, value: &str) {
        let mut conn = self.conn.lock();
        conn.extra_headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        conn.extra_headers.push((name.to_string(), value.to_string()));
    }

    /// Announce `Connection: close` whatever the client asked for.
    pub fn set_close_after_response(&self, close: bool) {
        self.conn.lock().close_after = close;
    }

    /// The client request this stream was opened with.
    pub fn request(&self) -> Option<HttpRequest> {
        self.conn.lock().request.clone()
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.conn.lock().client.as_ref().map(|c| c.peer_addr)
    }

    pub fn client_ip_addr(&self) -> Option<IpAddr> {
        self.client_addr().map(|addr| addr.ip())
    }

    pub fn client_ip_addr_str(&self) -> Option<String> {
        self.client_ip_addr().map(|ip| ip.to_string())
    }

    pub fn conn_id(&self) -> Option<u64> {
        self.conn.lock().client.as_ref().map(|c| c.conn_id)
    }

    /// Whether the client asked for a persistent connection.
    pub fn does_client_want_keep_alive(&self) -> bool {
        self.conn
            .lock()
            .request
            .as_ref()
            .is_some_and(HttpRequest::wants_keep_alive)
    }

    /// Render a plain HTTP response head for this client.
    pub fn create_http_response_header(&self, status: u16, reason: &str) -> Result<String> {
        Ok(self.build_head(status, reason, false)?.0.serialize())
    }

    /// Render a response head with the DLNA streaming headers added.
    pub fn create_http_response_header_dlna(&self, status: u16, reason: &str) -> Result<String> {
        Ok(self.build_head(status, reason, true)?.0.serialize())
    }

    pub fn send_http_response_header(&self, status: u16, reason: &str) -> Result<()> {
        self.send_head(status, reason, false)
    }

    pub fn send_http_response_header_dlna(&self, status: u16, reason: &str) -> Result<()> {
        self.send_head(status, reason, true)
    }

    pub fn is_header_sent(&self) -> bool {
        self.conn.lock().header_sent
    }

    /// Block until the response head has gone out or the stream closed.
    /// Returns whether the head was sent.
    pub fn wait_header_sent(&self, timeout: Duration) -> bool {
        let mut conn = self.conn.lock();
        if !conn.header_sent && !conn.closed {
            let _ = self
                .head_sent
                .wait_while_for(&mut conn, |c| !c.header_sent && !c.closed, timeout);
        }
        conn.header_sent
    }

    /// PTS bounds of recording `leaf_id` in 45 kHz ticks.
    pub fn get_record_pts45k(&self, leaf_id: i64) -> Result<(u32, u32)> {
        self.store
            .as_ref()
            .and_then(|store| store.resolve_pts_range(leaf_id))
            .ok_or(StreamError::RecordNotFound(leaf_id))
    }

    /// Serve control-plane events until the stream is closed.
    ///
    /// `StopRequest` and a disconnected channel close the stream. `done` is
    /// signaled exactly once when the loop exits, whatever the reason.
    pub fn run_event_notifier(&self, events: Receiver<StreamEvent>, done: SessionDone) -> Result<()> {
        let session_id = self.session.session_id();
        tracing::debug!(session_id, "notifier started");

        let result = loop {
            if self.session.is_closed() {
                break Ok(());
            }
            match events.recv_timeout(self.config.notifier_poll_interval) {
                Ok(StreamEvent::StopRequest) => {
                    tracing::debug!(session_id, "stop requested");
                    break self.close();
                }
                Ok(StreamEvent::HeaderReady {
                    status,
                    reason,
                    dlna,
                }) => {
                    if let Err(e) = self.send_head(status, &reason, dlna) {
                        tracing::warn!(session_id, error = %e, "sending response head failed");
                        let _ = self.close();
                        break Err(e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!(session_id, "event channel closed");
                    break self.close();
                }
            }
        };

        done.signal();
        tracing::debug!(session_id, "notifier finished");
        result
    }

    /// Run [`run_event_notifier`](Self::run_event_notifier) on its own thread.
    pub fn spawn_notifier(
        self: &Arc<Self>,
        events: Receiver<StreamEvent>,
        done: SessionDone,
    ) -> JoinHandle<Result<()>> {
        let stream = self.clone();
        thread::spawn(move || stream.run_event_notifier(events, done))
    }

    fn build_head(&self, status: u16, reason: &str, with_dlna: bool) -> Result<(HttpResponse, bool)> {
        let conn = self.conn.lock();
        let request = conn.request.as_ref().ok_or(StreamError::NotOpen)?;

        let http11 = request.version.eq_ignore_ascii_case("HTTP/1.1");
        let chunked = conn.content_length.is_none() && http11;
        let keep_alive = !conn.close_after
            && request.wants_keep_alive()
            && (conn.content_length.is_some() || chunked);

        let mut response = HttpResponse::new(status, reason)
            .add_header("Server", &self.config.server_agent)
            .add_header("Content-Type", &self.config.content_type);
        response = match conn.content_length {
            Some(len) => response.add_header("Content-Length", &len.to_string()),
            None if chunked => response.add_header("Transfer-Encoding", "chunked"),
            None => response,
        };
        response = response.add_header("Connection", if keep_alive { "keep-alive" } else { "close" });

        if with_dlna {
            let seek = conn.seek_support;
            let trick = self.session.trick_play();

            response = response
                .add_header(dlna::TRANSFER_MODE, "Streaming")
                .add_header(
                    dlna::CONTENT_FEATURES,
                    &dlna::content_features(self.config.dlna_profile.as_deref(), seek),
                );
            if seek.supports_byte() {
                response = response.add_header("Accept-Ranges", "bytes");
            }
            if seek.supports_time() {
                let range = if trick.time_range > 0.0 {
                    trick.time_range
                } else {
                    self.session.media_duration().map(|d| d as f32).unwrap_or(0.0)
                };
                response = response.add_header(
                    dlna::TIME_SEEK_RANGE,
                    &dlna::time_seek_range(trick.time_pos, range),
                );
            }
            if trick.is_trick_mode() {
                response = response.add_header(dlna::PLAY_SPEED, &dlna::play_speed(trick.play_speed));
            }
        }

        for (name, value) in &conn.extra_headers {
            response = response.set_header(name, value);
        }

        Ok((response, chunked && !request.is_head()))
    }

    fn send_head(&self, status: u16, reason: &str, with_dlna: bool) -> Result<()> {
        if self.session.state() != StreamState::Opened {
            return Err(StreamError::NotOpen);
        }

        let (response, chunked) = self.build_head(status, reason, with_dlna)?;
        let transport = {
            let conn = self.conn.lock();
            if conn.header_sent {
                tracing::warn!(session_id = self.session.session_id(), "response head already sent");
                return Ok(());
            }
            conn.client
                .as_ref()
                .map(|c| c.transport.clone())
                .ok_or(StreamError::NotOpen)?
        };

        if let Err(e) = transport.write_all(response.serialize().as_bytes()) {
            tracing::warn!(session_id = self.session.session_id(), error = %e, "client write failed");
            let _ = self.close();
            return Err(StreamError::Transport(e));
        }

        let mut conn = self.conn.lock();
        conn.header_sent = true;
        conn.chunked = chunked;
        self.head_sent.notify_all();

        tracing::debug!(
            session_id = self.session.session_id(),
            status,
            dlna = with_dlna,
            chunked,
            "response head sent"
        );
        Ok(())
    }
}

impl MediaStream for OutputMediaStream {
    fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Bind the client connection `request` arrived on.
    fn open(&self, request: &StreamRequest) -> Result<()> {
        self.session.ensure_openable()?;
        let client = request
            .client
            .clone()
            .ok_or_else(|| StreamError::Connection("output stream needs a client connection".into()))?;

        self.session.mark_opened()?;

        let peer = client.peer_addr;
        let conn_id = client.conn_id;
        {
            let mut conn = self.conn.lock();
            conn.request = Some(request.request.clone());
            conn.client = Some(client);
        }

        tracing::info!(
            session_id = self.session.session_id(),
            %peer,
            conn_id,
            url = %self.session.url(),
            "output stream opened"
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.session.mark_closed() == StreamState::Closed {
            return Ok(());
        }

        let (transport, terminate) = {
            let mut conn = self.conn.lock();
            conn.closed = true;
            self.head_sent.notify_all();
            (
                conn.client.as_ref().map(|c| c.transport.clone()),
                conn.header_sent && conn.chunked,
            )
        };
        let source = self.source.lock().take();
        if let Some(source) = source
            && let Err(e) = source.shutdown()
        {
            tracing::debug!(session_id = self.session.session_id(), error = %e, "source shutdown");
        }

        if let Some(transport) = transport {
            if terminate {
                let _ = transport.write_all(b"0\r\n\r\n");
            }
            if let Err(e) = transport.shutdown() {
                tracing::debug!(session_id = self.session.session_id(), error = %e, "client shutdown");
            }
        }

        tracing::info!(
            session_id = self.session.session_id(),
            bytes = self.session.total_bytes_streamed(),
            "output stream closed"
        );
        Ok(())
    }

    /// Pull from the source and deliver to the client.
    ///
    /// Fails with [`StreamError::HeaderNotSent`] until the response head
    /// is out.
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self.session.state() {
            StreamState::Init => return Err(StreamError::NotOpen),
            StreamState::Closed => return Ok(0),
            StreamState::Opened => {}
        }

        let (transport, chunked) = {
            let conn = self.conn.lock();
            if conn.closed {
                return Ok(0);
            }
            if !conn.header_sent {
                return Err(StreamError::HeaderNotSent);
            }
            match conn.client.as_ref() {
                Some(client) => (client.transport.clone(), conn.chunked),
                None => return Ok(0),
            }
        };
        let Some(source) = self.source.lock().clone() else {
            return Ok(0);
        };

        let n = match source.read(buf) {
            Ok(n) => n,
            Err(_) if self.session.is_closed() => return Ok(0),
            Err(e) => {
                tracing::warn!(session_id = self.session.session_id(), error = %e, "source read failed");
                let _ = self.close();
                return Err(StreamError::Transport(e));
            }
        };
        if n == 0 || self.session.is_closed() {
            return Ok(0);
        }

        let written = if chunked {
            let mut frame = format!("{:x}\r\n", n).into_bytes();
            frame.extend_from_slice(&buf[..n]);
            frame.extend_from_slice(b"\r\n");
            transport.write_all(&frame)
        } else {
            transport.write_all(&buf[..n])
        };

        if let Err(e) = written {
            if self.session.is_closed() {
                return Ok(0);
            }
            tracing::info!(session_id = self.session.session_id(), error = %e, "client went away");
            let _ = self.close();
            return Err(StreamError::Transport(e));
        }

        self.session.add_bytes_streamed(n as u64);
        Ok(n)
    }

    /// Resolve the associated recording's PTS bounds, falling back to
    /// observed timestamps for live streams.
    fn update_pts(&self) -> Option<u32> {
        let Some(record_id) = self.session.record_id() else {
            return self.session.update_pts();
        };

        match self.get_record_pts45k(record_id) {
            Ok((start, end)) => {
                self.session.set_pts_range(start, end);
                Some(self.session.last_good_pts())
            }
            Err(e) => {
                tracing::warn!(session_id = self.session.session_id(), record_id, error = %e, "recording PTS unavailable");
                None
            }
        }
    }

    fn client_id(&self) -> Option<ClientId> {
        let ip = self.client_ip_addr()?;
        Some(ClientId::for_peer(ip, self.session.session_id()))
    }
}
