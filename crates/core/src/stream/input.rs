use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MediaStream, StreamRequest};
use crate::error::{Result, StreamError};
use crate::protocol::url::check_url_len;
use crate::protocol::{HttpRequest, ResponseHead, dlna};
use crate::pts::TsPtsScanner;
use crate::session::{SessionRegistry, StreamDir, StreamSession, StreamState, StreamType};
use crate::transport::{Connector, Transport};
use crate::trickplay::{SeekDomain, TrickPlayState};

/// Ingest stream pulling media from an upstream HTTP URL.
///
/// Trick-play changes are applied by reconnecting with a `Range` (byte
/// domain) or `TimeSeekRange.dlna.org` (time domain) request header.
pub struct InputMediaStream {
    session: StreamSession,
    connector: Arc<dyn Connector>,
    io: Mutex<InputIo>,
    scanner: Mutex<TsPtsScanner>,
}

#[derive(Default)]
struct InputIo {
    /// Headers from the open request, replayed on every reconnect.
    forwarded: Vec<(String, String)>,
    /// Headers added through `set_header`.
    extra: Vec<(String, String)>,
    upstream: Option<Arc<dyn Transport>>,
    head: Option<ResponseHead>,
}

impl InputMediaStream {
    pub fn new(registry: &SessionRegistry, url: &str, connector: Arc<dyn Connector>) -> Result<Self> {
        Ok(Self {
            session: StreamSession::new(registry, StreamType::Http, StreamDir::Input, url)?,
            connector,
            io: Mutex::new(InputIo::default()),
            scanner: Mutex::new(TsPtsScanner::new()),
        })
    }

    /// Append a `Name: value` header sent on every subsequent upstream
    /// request. Headers accumulate.
    pub fn set_header(&self, header: &str) -> Result<()> {
        let (name, value) = header
            .split_once(':')
            .map(|(n, v)| (n.trim(), v.trim()))
            .filter(|(n, _)| !n.is_empty() && !n.contains(char::is_whitespace))
            .ok_or_else(|| StreamError::InvalidHeader(header.to_string()))?;

        self.io
            .lock()
            .extra
            .push((name.to_string(), value.to_string()));
        tracing::debug!(session_id = self.session.session_id(), name, value, "upstream header added");
        Ok(())
    }

    /// Send a HEAD request for `url` and return the response head.
    /// Does not open the stream or consume any payload.
    pub fn open_head_request(&self, url: &str) -> Result<ResponseHead> {
        check_url_len(url)?;

        let mut request = HttpRequest::new("HEAD", url);
        for (name, value) in &self.io.lock().extra {
            request = request.add_header(name, value);
        }

        let upstream = self.connector.connect(&request).inspect_err(|e| {
            tracing::warn!(session_id = self.session.session_id(), url, error = %e, "HEAD request failed");
        })?;
        let _ = upstream.body.shutdown();

        tracing::debug!(session_id = self.session.session_id(), url, status = upstream.head.status_code, "HEAD response");
        Ok(upstream.head)
    }

    /// Response head of the current upstream connection.
    pub fn response_head(&self) -> Option<ResponseHead> {
        self.io.lock().head.clone()
    }

    /// Declared length of the current upstream body.
    pub fn content_length(&self) -> Option<u64> {
        self.io.lock().head.as_ref().and_then(|h| h.content_length())
    }

    /// Re-issue the upstream request to honor pending trick-play changes.
    ///
    /// Returns `Ok(false)` when nothing was pending. On failure the change
    /// stays pending so the caller can retry.
    pub fn apply_trick_play_settings(&self) -> Result<bool> {
        if self.session.state() != StreamState::Opened {
            return Err(StreamError::NotOpen);
        }

        let Some(pending) = self.session.pending_trick_play() else {
            return Ok(false);
        };

        let request = self.build_request(Some(&pending));
        let upstream = self.connector.connect(&request).inspect_err(|e| {
            tracing::warn!(session_id = self.session.session_id(), error = %e, "trick play apply failed");
        })?;

        let previous = {
            let mut io = self.io.lock();
            io.head = Some(upstream.head);
            io.upstream.replace(upstream.body.clone())
        };
        if let Some(previous) = previous {
            let _ = previous.shutdown();
        }
        self.scanner.lock().reset();

        if self.session.is_closed() {
            let _ = upstream.body.shutdown();
            return Err(StreamError::NotOpen);
        }

        self.session.ack_trick_play(&pending);
        tracing::info!(
            session_id = self.session.session_id(),
            domain = ?pending.domain,
            speed = pending.play_speed,
            "trick play applied"
        );
        Ok(true)
    }

    /// `std::io::Read` adapter over this stream.
    pub fn reader(self: &Arc<Self>) -> InputReader {
        InputReader {
            stream: self.clone(),
        }
    }

    fn build_request(&self, trick: Option<&TrickPlayState>) -> HttpRequest {
        let mut request = HttpRequest::get(self.session.url());
        {
            let io = self.io.lock();
            for (name, value) in io.forwarded.iter().chain(io.extra.iter()) {
                request = request.add_header(name, value);
            }
        }

        let Some(trick) = trick else {
            return request;
        };

        match trick.domain {
            Some(SeekDomain::Byte) => {
                let last = (trick.byte_size > 0)
                    .then(|| trick.byte_pos.checked_add(trick.byte_size - 1))
                    .flatten();
                let range = match last {
                    Some(last) => format!("bytes={}-{}", trick.byte_pos, last),
                    None => format!("bytes={}-", trick.byte_pos),
                };
                request = request.add_header("Range", &range);
            }
            Some(SeekDomain::Time) => {
                request = request.add_header(
                    dlna::TIME_SEEK_RANGE,
                    &format!("npt={:.3}-", trick.time_pos),
                );
            }
            None => {}
        }
        if trick.is_trick_mode() {
            request = request.add_header(dlna::PLAY_SPEED, &dlna::play_speed(trick.play_speed));
        }
        request
    }
}

impl MediaStream for InputMediaStream {
    fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Connect to the session URL, forwarding `request`'s headers.
    ///
    /// A trick-play position set before open is part of the first request.
    fn open(&self, request: &StreamRequest) -> Result<()> {
        self.session.ensure_openable()?;

        self.io.lock().forwarded = request.request.headers.clone();

        let pending = self.session.pending_trick_play();
        let upstream_request = self.build_request(pending.as_ref());
        let upstream = self.connector.connect(&upstream_request).inspect_err(|e| {
            tracing::warn!(session_id = self.session.session_id(), url = %self.session.url(), error = %e, "upstream open failed");
        })?;

        if let Err(e) = self.session.mark_opened() {
            let _ = upstream.body.shutdown();
            return Err(e);
        }

        {
            let mut io = self.io.lock();
            io.upstream = Some(upstream.body);
            io.head = Some(upstream.head);
        }
        if let Some(pending) = pending {
            self.session.ack_trick_play(&pending);
        }

        tracing::info!(session_id = self.session.session_id(), url = %self.session.url(), "input stream opened");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.session.mark_closed() == StreamState::Closed {
            return Ok(());
        }

        let upstream = self.io.lock().upstream.take();
        if let Some(upstream) = upstream
            && let Err(e) = upstream.shutdown()
        {
            tracing::debug!(session_id = self.session.session_id(), error = %e, "upstream shutdown");
        }

        tracing::info!(
            session_id = self.session.session_id(),
            bytes = self.session.total_bytes_streamed(),
            "input stream closed"
        );
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let upstream = match self.session.state() {
            StreamState::Init => return Err(StreamError::NotOpen),
            StreamState::Closed => return Ok(0),
            StreamState::Opened => match self.io.lock().upstream.clone() {
                Some(upstream) => upstream,
                None => return Ok(0),
            },
        };

        let n = match upstream.read(buf) {
            Ok(n) => n,
            Err(_) if self.session.is_closed() => return Ok(0),
            Err(e) => {
                tracing::warn!(session_id = self.session.session_id(), error = %e, "upstream read failed");
                let _ = self.close();
                return Err(StreamError::Transport(e));
            }
        };

        if self.session.is_closed() {
            return Ok(0);
        }
        if n > 0 {
            self.session.add_bytes_streamed(n as u64);
            if let Some(pts) = self.scanner.lock().feed(&buf[..n]) {
                self.session.observe_pts(pts);
            }
        }
        Ok(n)
    }

    /// Commit the latest transport-stream PTS; the end PTS follows it.
    fn update_pts(&self) -> Option<u32> {
        let pts = self.session.update_pts()?;
        self.session.set_end_pts(pts);
        Some(pts)
    }
}

/// Reads an [`InputMediaStream`] as a byte source.
///
/// As a [`Transport`], `shutdown` closes the input, which makes a blocked
/// `read` return end of stream.
pub struct InputReader {
    stream: Arc<InputMediaStream>,
}

impl InputReader {
    fn pull(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).map_err(|e| match e {
            StreamError::Transport(e) => e,
            other => io::Error::other(other),
        })
    }
}

impl io::Read for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf)
    }
}

impl Transport for InputReader {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf)
    }

    fn write_all(&self, _buf: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "input stream is read-only",
        ))
    }

    fn shutdown(&self) -> io::Result<()> {
        self.stream.close().map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pts::tests::pes_packet;
    use crate::transport::Upstream;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Upstream body serving a fixed buffer.
    struct MemoryBody {
        data: Mutex<VecDeque<u8>>,
    }

    impl Transport for MemoryBody {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut data = self.data.lock();
            let n = buf.len().min(data.len());
            for (slot, byte) in buf.iter_mut().zip(data.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write_all(&self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&self) -> io::Result<()> {
            self.data.lock().clear();
            Ok(())
        }
    }

    /// Records requests and serves `payload`, or refuses when `fail` is set.
    #[derive(Default)]
    struct MockConnector {
        payload: Vec<u8>,
        fail: Mutex<bool>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Connector for MockConnector {
        fn connect(&self, request: &HttpRequest) -> Result<Upstream> {
            self.requests.lock().push(request.clone());
            if *self.fail.lock() {
                return Err(StreamError::Connection("refused".into()));
            }
            Ok(Upstream {
                head: ResponseHead::new(200, "OK").add_header("Content-Length", "376"),
                body: Arc::new(MemoryBody {
                    data: Mutex::new(self.payload.iter().copied().collect()),
                }),
            })
        }
    }

    /// Hands out one connected socket whose far end never writes.
    struct SocketConnector {
        socket: Mutex<Option<TcpStream>>,
    }

    impl Connector for SocketConnector {
        fn connect(&self, _request: &HttpRequest) -> Result<Upstream> {
            let socket = self
                .socket
                .lock()
                .take()
                .ok_or_else(|| StreamError::Connection("socket already used".into()))?;
            Ok(Upstream {
                head: ResponseHead::new(200, "OK"),
                body: Arc::new(socket),
            })
        }
    }

    fn input(connector: Arc<MockConnector>) -> (SessionRegistry, InputMediaStream) {
        let registry = SessionRegistry::new();
        let stream = InputMediaStream::new(&registry, "http://upstream/live.ts", connector).unwrap();
        (registry, stream)
    }

    fn open(stream: &InputMediaStream) -> Result<()> {
        stream.open(&StreamRequest::upstream(HttpRequest::get("http://upstream/live.ts")))
    }

    #[test]
    fn open_read_close() {
        let mut payload = pes_packet(90_000);
        payload.extend(pes_packet(90_000 + 180_000));
        let connector = Arc::new(MockConnector {
            payload,
            ..Default::default()
        });
        let (registry, stream) = input(connector);

        assert!(matches!(stream.read(&mut [0u8; 16]), Err(StreamError::NotOpen)));

        open(&stream).unwrap();
        assert!(stream.session().is_open());
        assert_eq!(registry.input_session_count(), 1);
        assert_eq!(stream.content_length(), Some(376));

        let mut buf = [0u8; 512];
        assert_eq!(stream.read(&mut buf).unwrap(), 376);
        assert_eq!(stream.session().total_bytes_streamed(), 376);

        assert_eq!(stream.update_pts(), Some(135_000));
        assert_eq!(stream.session().end_pts(), Some(135_000));

        stream.close().unwrap();
        stream.close().unwrap();
        assert_eq!(registry.input_session_count(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn open_failure_leaves_stream_unopened() {
        let connector = Arc::new(MockConnector::default());
        *connector.fail.lock() = true;
        let (registry, stream) = input(connector.clone());

        assert!(matches!(open(&stream), Err(StreamError::Connection(_))));
        assert!(!stream.session().is_open());
        assert_eq!(registry.input_session_count(), 0);

        *connector.fail.lock() = false;
        open(&stream).unwrap();
    }

    #[test]
    fn open_after_close_rejected() {
        let (_registry, stream) = input(Arc::new(MockConnector::default()));
        open(&stream).unwrap();
        stream.close().unwrap();
        assert!(matches!(open(&stream), Err(StreamError::NotOpen)));
    }

    #[test]
    fn headers_accumulate() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        stream.set_header("X-Tuner: 1").unwrap();
        stream.set_header("X-Token: abc").unwrap();
        assert!(stream.set_header("no colon here").is_err());

        open(&stream).unwrap();
        let sent = connector.requests.lock()[0].clone();
        assert_eq!(sent.get_header("X-Tuner"), Some("1"));
        assert_eq!(sent.get_header("X-Token"), Some("abc"));
    }

    #[test]
    fn byte_seek_reconnects_with_range() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        open(&stream).unwrap();

        assert!(!stream.apply_trick_play_settings().unwrap());

        stream.session().set_trick_play_byte_pos(1880);
        stream.session().set_trick_play_byte_size(188);
        assert!(stream.apply_trick_play_settings().unwrap());
        assert!(stream.session().pending_trick_play().is_none());

        let requests = connector.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].get_header("Range"), Some("bytes=1880-2067"));
    }

    #[test]
    fn time_seek_reconnects_with_npt() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        open(&stream).unwrap();

        stream.session().set_trick_play_time_seek(30.0);
        stream.session().set_trick_play_rate(4.0);
        stream.apply_trick_play_settings().unwrap();

        let requests = connector.requests.lock();
        assert_eq!(requests[1].get_header(dlna::TIME_SEEK_RANGE), Some("npt=30.000-"));
        assert_eq!(requests[1].get_header(dlna::PLAY_SPEED), Some("speed=4"));
        assert_eq!(requests[1].get_header("Range"), None);
    }

    #[test]
    fn failed_apply_keeps_change_pending() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        open(&stream).unwrap();

        stream.session().set_trick_play_byte_pos(376);
        *connector.fail.lock() = true;
        assert!(stream.apply_trick_play_settings().is_err());
        assert!(stream.session().pending_trick_play().is_some());

        *connector.fail.lock() = false;
        assert!(stream.apply_trick_play_settings().unwrap());
    }

    #[test]
    fn seek_before_open_goes_into_first_request() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        stream.session().set_trick_play_byte_pos(100);
        open(&stream).unwrap();

        assert_eq!(connector.requests.lock()[0].get_header("Range"), Some("bytes=100-"));
        assert!(stream.session().pending_trick_play().is_none());
    }

    #[test]
    fn apply_requires_open() {
        let (_registry, stream) = input(Arc::new(MockConnector::default()));
        assert!(matches!(
            stream.apply_trick_play_settings(),
            Err(StreamError::NotOpen)
        ));
    }

    #[test]
    fn head_request_does_not_open() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        let head = stream.open_head_request("http://upstream/live.ts").unwrap();
        assert_eq!(head.status_code, 200);
        assert_eq!(connector.requests.lock()[0].method, "HEAD");
        assert!(!stream.session().is_open());
    }

    #[test]
    fn close_interrupts_blocked_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let socket = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_silent_upstream, _) = listener.accept().unwrap();

        let registry = SessionRegistry::new();
        let connector = Arc::new(SocketConnector {
            socket: Mutex::new(Some(socket)),
        });
        let stream = Arc::new(InputMediaStream::new(&registry, "http://u/live.ts", connector).unwrap());
        open(&stream).unwrap();

        let reader = {
            let stream = stream.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = stream.read(&mut [0u8; 188]);
                (result, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(100));
        stream.close().unwrap();

        let (result, elapsed) = reader.join().unwrap();
        assert_eq!(result.unwrap(), 0);
        assert!(elapsed < Duration::from_secs(5), "read took {:?}", elapsed);
        assert_eq!(registry.input_session_count(), 0);
    }

    #[test]
    fn byte_seek_near_end_of_range_is_open_ended() {
        let connector = Arc::new(MockConnector::default());
        let (_registry, stream) = input(connector.clone());
        stream.session().set_trick_play_byte_pos(i64::MAX - 10);
        stream.session().set_trick_play_byte_size(100);
        open(&stream).unwrap();

        let expected = format!("bytes={}-", i64::MAX - 10);
        assert_eq!(connector.requests.lock()[0].get_header("Range"), Some(expected.as_str()));
    }

    #[test]
    fn reader_shutdown_closes_input() {
        let registry = SessionRegistry::new();
        let stream = Arc::new(
            InputMediaStream::new(&registry, "http://u/a", Arc::new(MockConnector::default())).unwrap(),
        );
        open(&stream).unwrap();

        let reader = stream.reader();
        Transport::shutdown(&reader).unwrap();
        assert!(stream.session().is_closed());
        assert_eq!(Transport::read(&reader, &mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn reader_adapter() {
        let connector = Arc::new(MockConnector {
            payload: b"abcdef".to_vec(),
            ..Default::default()
        });
        let registry = SessionRegistry::new();
        let stream = Arc::new(InputMediaStream::new(&registry, "http://u/a", connector).unwrap());
        open(&stream).unwrap();

        let mut out = String::new();
        stream.reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "abcdef");
    }
}
