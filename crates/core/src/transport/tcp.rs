use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::Connector;
use crate::config::StreamerConfig;
use crate::error::{Result, StreamError};
use crate::notify::{SessionDone, StreamEvent};
use crate::protocol::response::reason_phrase;
use crate::protocol::{self, HttpRequest, HttpResponse, dlna};
use crate::recording::RecordingStore;
use crate::session::{SessionRegistry, StreamType};
use crate::stream::{ClientConnection, InputMediaStream, MediaStream, OutputMediaStream, StreamRequest};

/// Body bytes moved per `read` on the relay path.
const RELAY_CHUNK: usize = 64 * 1024;

/// How often the relay refreshes bitrate and PTS statistics.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Client headers that are turned into trick-play state instead of being
/// forwarded upstream verbatim.
const SEEK_HEADERS: [&str; 3] = ["Range", dlna::TIME_SEEK_RANGE, dlna::PLAY_SPEED];

/// Upstream response headers copied onto the client's response head.
const PASSTHROUGH_HEADERS: [&str; 2] = ["Content-Range", dlna::TIME_SEEK_RANGE];

/// Everything a client connection needs to relay media.
#[derive(Clone)]
pub struct RelayContext {
    pub registry: SessionRegistry,
    pub config: Arc<StreamerConfig>,
    /// Prefix joined with the client request path to form the upstream URL.
    pub upstream_base: String,
    pub connector: Arc<dyn Connector>,
    pub store: Option<Arc<dyn RecordingStore>>,
    pub next_conn_id: Arc<AtomicU64>,
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, ctx: RelayContext, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let c = ctx.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// What became of the connection after one request.
enum Outcome {
    /// Error response written; the connection may carry another request.
    Answered { keep_alive: bool },
    /// The connection was handed to an output stream, which closed it.
    Relayed,
}

/// A single HTTP client connection.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer_addr: SocketAddr,
    conn_id: u64,
    ctx: RelayContext,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(stream: TcpStream, ctx: RelayContext, running: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let conn_id = ctx.next_conn_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(%peer_addr, conn_id, "client connected");

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            peer_addr,
            conn_id,
            ctx,
        };

        let reason = conn.run(&running);
        tracing::info!(%peer_addr, conn_id, reason, "client disconnected");
    }

    /// Request loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let raw = match protocol::read_head(&mut self.reader) {
                Ok(Some(raw)) => raw,
                Ok(None) => return "connection closed by client",
                Err(StreamError::Parse { .. }) => {
                    let _ = self.respond(400, false);
                    return "oversized request head";
                }
                Err(_) => return "read error",
            };

            let request = match HttpRequest::parse(&raw) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    let _ = self.respond(400, false);
                    return "malformed request";
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                uri = %request.uri,
                version = %request.version,
                "request"
            );

            match self.serve(request) {
                Outcome::Answered { keep_alive: true } => continue,
                Outcome::Answered { keep_alive: false } => return "answered",
                Outcome::Relayed => return "relay finished",
            }
        }

        "server shutting down"
    }

    fn serve(&mut self, request: HttpRequest) -> Outcome {
        let keep_alive = request.wants_keep_alive();

        if !request.method.eq_ignore_ascii_case("GET") && !request.is_head() {
            return self.answer(501, keep_alive);
        }

        let url = format!(
            "{}{}",
            self.ctx.upstream_base.trim_end_matches('/'),
            request.target()
        );

        let input = match self.open_input(&url, &request) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, url = %url, error = %e, "upstream open failed");
                let status = match e {
                    StreamError::RangeNotSatisfiable(_) => 416,
                    StreamError::InvalidUrl(_) | StreamError::Parse { .. } => 400,
                    _ => 502,
                };
                return self.answer(status, keep_alive);
            }
        };

        if let Err(e) = self.relay(&input, request) {
            tracing::warn!(peer = %self.peer_addr, error = %e, "relay failed");
        }

        let _ = input.close();
        self.destroy(input.session().session_id());
        Outcome::Relayed
    }

    /// Create and open the ingest side, mapping the client's seek headers
    /// onto its trick-play state.
    fn open_input(&self, url: &str, request: &HttpRequest) -> Result<Arc<InputMediaStream>> {
        let byte_range = match request.get_header("Range").and_then(dlna::parse_byte_range) {
            Some((start, Some(end))) => {
                let size = end
                    .checked_sub(start)
                    .and_then(|span| span.checked_add(1))
                    .ok_or_else(|| StreamError::RangeNotSatisfiable(format!("bytes={}-{}", start, end)))?;
                Some((start, size))
            }
            Some((start, None)) => Some((start, 0)),
            None => None,
        };

        let input = self.ctx.registry.create_input(url, self.ctx.connector.clone())?;
        let session = input.session();

        if let Some((start, size)) = byte_range {
            session.set_trick_play_byte_pos(start);
            if size > 0 {
                session.set_trick_play_byte_size(size);
            }
        }
        if let Some((start, end)) = request
            .get_header(dlna::TIME_SEEK_RANGE)
            .and_then(dlna::parse_npt_range)
        {
            session.set_trick_play_time_seek(start);
            if let Some(end) = end {
                session.set_trick_play_time_range(end);
            }
        }
        if let Some(speed) = request.get_header(dlna::PLAY_SPEED).and_then(dlna::parse_play_speed) {
            session.set_trick_play_rate(speed);
        }

        let mut forwarded = HttpRequest::get(url);
        for (name, value) in &request.headers {
            if !SEEK_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                forwarded = forwarded.add_header(name, value);
            }
        }

        if let Err(e) = input.open(&StreamRequest::upstream(forwarded)) {
            self.destroy(session.session_id());
            return Err(e);
        }
        Ok(input)
    }

    /// Serve one media request from an opened input.
    fn relay(&self, input: &Arc<InputMediaStream>, request: HttpRequest) -> Result<()> {
        let is_head = request.is_head();
        let output = self.ctx.registry.create_output(
            StreamType::Http,
            &request.uri,
            &self.ctx.config,
            self.ctx.store.clone(),
        )?;
        let output_id = output.session().session_id();

        let result = self.run_output(input, &output, request, is_head);

        if let Err(e) = output.close() {
            tracing::debug!(session_id = output_id, error = %e, "output close");
        }
        self.destroy(output_id);
        result
    }

    fn run_output(
        &self,
        input: &Arc<InputMediaStream>,
        output: &Arc<OutputMediaStream>,
        request: HttpRequest,
        is_head: bool,
    ) -> Result<()> {
        let trick = input.session().trick_play();
        output.session().set_trick_play_rate(trick.play_speed);
        output.session().set_trick_play_time_seek(trick.time_pos);
        output.session().set_trick_play_time_range(trick.time_range);
        output.set_content_length(input.content_length());
        output.set_close_after_response(true);

        let head = input.response_head();
        for name in PASSTHROUGH_HEADERS {
            if let Some(value) = head.as_ref().and_then(|h| h.get_header(name)) {
                output.add_response_header(name, value);
            }
        }
        let status = head.map(|h| h.status_code).unwrap_or(200);

        let client = ClientConnection {
            peer_addr: self.peer_addr,
            conn_id: self.conn_id,
            transport: Arc::new(self.writer.try_clone()?),
        };
        output.open(&StreamRequest::client(request, client))?;
        output.attach_source(Arc::new(input.reader()));

        let (events, rx) = mpsc::channel();
        let done = SessionDone::new();
        let notifier = output.spawn_notifier(rx, done.clone());

        let _ = events.send(StreamEvent::HeaderReady {
            status,
            reason: reason_phrase(status).to_string(),
            dlna: true,
        });

        let wait = self.ctx.config.session_done_timeout;
        let pumped = if output.wait_header_sent(wait) && !is_head {
            self.pump(input, output)
        } else {
            Ok(())
        };

        let _ = events.send(StreamEvent::StopRequest);
        if done.wait_timeout(wait) {
            if let Ok(Err(e)) = notifier.join() {
                tracing::debug!(conn_id = self.conn_id, error = %e, "notifier exited with error");
            }
        } else {
            tracing::warn!(conn_id = self.conn_id, "notifier did not finish in time");
        }

        pumped
    }

    /// Move body bytes until either side ends, refreshing statistics.
    fn pump(&self, input: &Arc<InputMediaStream>, output: &Arc<OutputMediaStream>) -> Result<()> {
        let _holder = output.session().acquire();
        let mut buf = vec![0u8; RELAY_CHUNK];
        let mut window = Instant::now();

        let result = loop {
            match output.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e),
            }

            if window.elapsed() >= STATS_INTERVAL {
                let secs = window.elapsed().as_secs() as u32;
                let bit_rate = output.session().calc_bit_rate(secs);
                output.session().save_total_bytes_streamed();
                window = Instant::now();

                let elapsed = input.update_pts().and_then(|pts| input.elapsed_time(pts).ok());
                tracing::debug!(
                    session_id = output.session().session_id(),
                    bit_rate,
                    elapsed_secs = ?elapsed,
                    "relay progress"
                );
            }
        };

        tracing::info!(
            conn_id = self.conn_id,
            bytes = output.session().total_bytes_streamed(),
            "relay ended"
        );
        result
    }

    fn destroy(&self, session_id: u64) {
        if let Err(e) = self.ctx.registry.destroy(session_id) {
            tracing::warn!(session_id, error = %e, "session teardown failed");
        }
    }

    fn answer(&mut self, status: u16, keep_alive: bool) -> Outcome {
        match self.respond(status, keep_alive) {
            Ok(()) => Outcome::Answered { keep_alive },
            Err(_) => Outcome::Answered { keep_alive: false },
        }
    }

    /// Write a bodiless response.
    fn respond(&mut self, status: u16, keep_alive: bool) -> std::io::Result<()> {
        let response = HttpResponse::new(status, reason_phrase(status))
            .add_header("Server", &self.ctx.config.server_agent)
            .add_header("Content-Length", "0")
            .add_header("Connection", if keep_alive { "keep-alive" } else { "close" });

        tracing::debug!(peer = %self.peer_addr, status, "response");
        self.writer.write_all(response.serialize().as_bytes())
    }
}
