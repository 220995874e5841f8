//! Integration tests: relay a media request end to end over loopback.
//!
//! A scripted upstream server answers each accepted connection with a
//! canned response; a plain TCP client talks to the relay and checks the
//! HTTP/DLNA head and body it receives.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mediastream::protocol::HttpRequest;
use mediastream::{
    HttpConnector, MediaStream, Server, SessionRegistry, StreamError, StreamRequest,
    StreamType, StreamerConfig,
};

/// Upstream that serves one canned response per connection and records
/// the request heads it saw.
struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    fn start(responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    head.push_str(&line);
                }
                seen.lock().unwrap().push(head);
                let _ = stream.write_all(&response);
            }
        });

        MockUpstream { addr, requests }
    }

    fn base(&self) -> String {
        format!("http://{}/media", self.addr)
    }

    fn request(&self, index: usize) -> HttpRequest {
        HttpRequest::parse(&self.requests.lock().unwrap()[index]).unwrap()
    }
}

fn ok_response(status: &str, body: &[u8]) -> Vec<u8> {
    response_with(status, &[], body)
}

fn response_with(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Type: video/mpeg\r\nContent-Length: {}\r\n",
        status,
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}

/// One TS packet starting a video PES with the given 90 kHz PTS.
fn ts_packet(pts90k: u64) -> Vec<u8> {
    let mut packet = vec![0xFF; 188];
    packet[..4].copy_from_slice(&[0x47, 0x41, 0x00, 0x10]);
    let marker = |bits: u64, prefix: u8| prefix | (((bits & 0x07) as u8) << 1);
    let pes = [
        0x00,
        0x00,
        0x01,
        0xE0,
        0x00,
        0x00,
        0x80,
        0x80,
        0x05,
        marker(pts90k >> 30, 0x21),
        (pts90k >> 22) as u8,
        0x01 | (((pts90k >> 15) as u8) << 1),
        (pts90k >> 7) as u8,
        0x01 | ((pts90k as u8) << 1),
    ];
    packet[4..4 + pes.len()].copy_from_slice(&pes);
    packet
}

fn start_relay(upstream_base: &str) -> Server {
    let mut server = Server::with_config("127.0.0.1:0", upstream_base, StreamerConfig::default());
    server.start().expect("server start");
    server
}

/// Send `request` and read until the relay closes the connection.
fn fetch(server: &Server, request: &str) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(server.local_addr().unwrap()).expect("connect to relay");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(request.as_bytes()).unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete response head");
    let head = String::from_utf8_lossy(&raw[..split + 4]).into_owned();
    (head, raw[split + 4..].to_vec())
}

fn wait_until_empty(registry: &SessionRegistry) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !registry.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(registry.is_empty(), "sessions left: {:?}", registry.session_ids());
}

#[test]
fn relay_serves_dlna_head_and_body() {
    let body: Vec<u8> = (0..4).flat_map(|i| ts_packet(90_000 * i)).collect();
    let upstream = MockUpstream::start(vec![ok_response("200 OK", &body)]);
    let mut server = start_relay(&upstream.base());

    let (head, received) = fetch(
        &server,
        "GET /live/ch1.ts HTTP/1.1\r\nHost: relay\r\nX-Device: tv\r\nConnection: close\r\n\r\n",
    );

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "head: {}", head);
    assert!(head.contains(&format!("Content-Length: {}\r\n", body.len())));
    assert!(head.contains("Content-Type: video/mpeg\r\n"));
    assert!(head.contains("transferMode.dlna.org: Streaming\r\n"));
    assert!(head.contains("contentFeatures.dlna.org: "));
    assert!(head.contains("Accept-Ranges: bytes\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(received, body);

    let sent = upstream.request(0);
    assert_eq!(sent.method, "GET");
    assert_eq!(sent.uri, "/media/live/ch1.ts");
    assert_eq!(sent.get_header("X-Device"), Some("tv"));

    wait_until_empty(server.registry());
    assert_eq!(server.registry().input_session_count(), 0);
    assert_eq!(server.registry().output_session_count(StreamType::Http), 0);
    server.stop();
}

#[test]
fn relay_forwards_byte_range() {
    let body = vec![0x47; 188];
    let upstream = MockUpstream::start(vec![response_with(
        "206 Partial Content",
        &[("Content-Range", "bytes 376-563/1000")],
        &body,
    )]);
    let mut server = start_relay(&upstream.base());

    let (head, received) = fetch(
        &server,
        "GET /rec/42.ts?leaf=7 HTTP/1.1\r\nRange: bytes=376-563\r\n\r\n",
    );

    assert!(head.starts_with("HTTP/1.1 206 Partial Content\r\n"), "head: {}", head);
    assert!(head.contains("Content-Range: bytes 376-563/1000\r\n"), "head: {}", head);
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(received.len(), 188);

    let sent = upstream.request(0);
    assert_eq!(sent.uri, "/media/rec/42.ts?leaf=7");
    assert_eq!(sent.get_header("Range"), Some("bytes=376-563"));

    wait_until_empty(server.registry());
    server.stop();
}

#[test]
fn relay_forwards_time_seek_and_speed() {
    let upstream = MockUpstream::start(vec![ok_response("200 OK", b"")]);
    let mut server = start_relay(&upstream.base());

    let (head, _) = fetch(
        &server,
        "GET /live/ch2.ts HTTP/1.1\r\nTimeSeekRange.dlna.org: npt=30.0-\r\nPlaySpeed.dlna.org: speed=4\r\n\r\n",
    );

    assert!(head.contains("PlaySpeed.dlna.org: speed=4\r\n"), "head: {}", head);
    let sent = upstream.request(0);
    assert_eq!(sent.get_header("TimeSeekRange.dlna.org"), Some("npt=30.000-"));
    assert_eq!(sent.get_header("PlaySpeed.dlna.org"), Some("speed=4"));

    wait_until_empty(server.registry());
    server.stop();
}

#[test]
fn relay_head_request_sends_head_only() {
    let upstream = MockUpstream::start(vec![ok_response("200 OK", &[0x47; 376])]);
    let mut server = start_relay(&upstream.base());

    let (head, received) = fetch(&server, "HEAD /live/ch1.ts HTTP/1.1\r\n\r\n");

    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Length: 376\r\n"));
    assert!(received.is_empty());

    wait_until_empty(server.registry());
    server.stop();
}

#[test]
fn relay_rejects_overflowing_byte_range() {
    let mut server = start_relay("http://127.0.0.1:1");

    let (head, _) = fetch(
        &server,
        "GET /a.ts HTTP/1.1\r\nRange: bytes=0-9223372036854775807\r\nConnection: close\r\n\r\n",
    );
    assert!(
        head.starts_with("HTTP/1.1 416 Requested Range Not Satisfiable\r\n"),
        "head: {}",
        head
    );

    wait_until_empty(server.registry());
    assert_eq!(server.registry().input_session_count(), 0);
    server.stop();
}

#[test]
fn relay_unreachable_upstream_is_bad_gateway() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut server = start_relay(&format!("http://127.0.0.1:{}", port));

    let (head, _) = fetch(&server, "GET /a.ts HTTP/1.1\r\nConnection: close\r\n\r\n");

    assert!(head.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "head: {}", head);
    wait_until_empty(server.registry());
    server.stop();
}

#[test]
fn relay_rejects_unsupported_method() {
    let mut server = start_relay("http://127.0.0.1:1");

    let (head, _) = fetch(&server, "POST /a.ts HTTP/1.0\r\n\r\n");

    assert!(head.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "head: {}", head);
    assert!(head.contains("Connection: close\r\n"));
    server.stop();
}

#[test]
fn server_start_twice() {
    let mut server = start_relay("http://127.0.0.1:1");
    assert!(server.is_running());
    assert!(matches!(server.start(), Err(StreamError::AlreadyRunning)));
    server.stop();
    assert!(!server.is_running());
}

#[test]
fn input_stream_tracks_pts_over_http() {
    // 0 s, 1 s, 2 s at 90 kHz.
    let body: Vec<u8> = (0..3).flat_map(|i| ts_packet(90_000 * i)).collect();
    let upstream = MockUpstream::start(vec![ok_response("200 OK", &body)]);

    let registry = SessionRegistry::new();
    let url = format!("{}/vod/movie.ts", upstream.base());
    let input = registry
        .create_input(&url, Arc::new(HttpConnector::new(&StreamerConfig::default()).unwrap()))
        .unwrap();

    input.open(&StreamRequest::upstream(HttpRequest::get(&url))).unwrap();
    assert_eq!(registry.input_session_count(), 1);

    // The first packet alone fixes the start PTS.
    let mut buf = [0u8; 188];
    let mut total = 0;
    while total < 188 {
        let n = input.read(&mut buf[total..]).unwrap();
        assert!(n > 0, "upstream ended early");
        total += n;
    }
    assert_eq!(input.update_pts(), Some(0));

    loop {
        let n = input.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, body.len());
    assert_eq!(input.session().total_bytes_streamed(), body.len() as u64);

    let pts = input.update_pts().unwrap();
    assert_eq!(pts, 90_000);
    assert_eq!(input.elapsed_time(pts).unwrap(), 2);
    assert_eq!(input.media_duration().unwrap(), 2);

    input.close().unwrap();
    assert_eq!(input.read(&mut buf).unwrap(), 0);
    assert_eq!(registry.input_session_count(), 0);
    registry.destroy(input.session().session_id()).unwrap();
}
