//! Media stream session state.
//!
//! A session is the non-polymorphic core shared by every stream kind. It
//! tracks:
//!
//! - The stream identity: type, direction, URL, session id.
//! - The lifecycle state, one state machine for every stream kind.
//! - A usage count of concurrent holders (control plane, I/O path, ...).
//! - Byte counters for bitrate computation.
//! - PTS bookkeeping for elapsed time and duration.
//! - Trick-play parameters.
//!
//! ## Lifecycle
//!
//! ```text
//! new()   -> Init
//! open()  -> Opened   (from Init only)
//! close() -> Closed   (from Init or Opened, idempotent)
//! ```
//!
//! There are no backward transitions: a closed stream stays closed.
//!
//! All mutable state sits behind a single `parking_lot::Mutex` per session.
//! Transport I/O never runs under it.

pub mod registry;

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Result, StreamError};
use crate::protocol::url::check_url_len;
use crate::pts::{PtsClock, ticks_to_secs_f32};
use crate::trickplay::TrickPlayState;
pub use registry::{SessionCounters, SessionRegistry};

/// Stream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Rtp,
    Rtsp,
    Http,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [StreamType::Rtp, StreamType::Rtsp, StreamType::Http];

    pub(crate) fn index(self) -> usize {
        match self {
            StreamType::Rtp => 0,
            StreamType::Rtsp => 1,
            StreamType::Http => 2,
        }
    }
}

/// Direction of media flow relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDir {
    /// Ingest from an upstream source.
    Input,
    /// Egress to a client.
    Output,
}

impl StreamDir {
    pub(crate) fn index(self) -> usize {
        match self {
            StreamDir::Input => 0,
            StreamDir::Output => 1,
        }
    }
}

/// Stream lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Constructed, not opened yet.
    Init,
    /// Connection established.
    Opened,
    /// Closed; terminal.
    Closed,
}

/// Attributes fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub session_id: u64,
    pub stream_type: StreamType,
    pub direction: StreamDir,
    pub url: String,
}

#[derive(Debug)]
struct SessionInner {
    state: StreamState,
    usage_count: u32,
    trick_play: TrickPlayState,
    pts: PtsClock,
    total_bytes_streamed: u64,
    total_bytes_streamed_prev: u64,
    bit_rate: u64,
    record_id: Option<i64>,
    user_data: Option<Weak<dyn Any + Send + Sync>>,
}

/// Shared state of one media stream.
pub struct StreamSession {
    identity: StreamIdentity,
    counters: Arc<SessionCounters>,
    inner: Mutex<SessionInner>,
}

impl StreamSession {
    /// Create a session with a fresh id from `registry`.
    ///
    /// Fails with [`StreamError::InvalidUrl`] if `url` exceeds 1024 bytes.
    pub fn new(
        registry: &SessionRegistry,
        stream_type: StreamType,
        direction: StreamDir,
        url: &str,
    ) -> Result<Self> {
        check_url_len(url)?;

        let counters = registry.counters().clone();
        let session_id = counters.next_session_id();

        tracing::debug!(session_id, ?stream_type, ?direction, url, "session created");

        Ok(StreamSession {
            identity: StreamIdentity {
                session_id,
                stream_type,
                direction,
                url: url.to_string(),
            },
            counters,
            inner: Mutex::new(SessionInner {
                state: StreamState::Init,
                usage_count: 0,
                trick_play: TrickPlayState::new(),
                pts: PtsClock::new(),
                total_bytes_streamed: 0,
                total_bytes_streamed_prev: 0,
                bit_rate: 0,
                record_id: None,
                user_data: None,
            }),
        })
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> u64 {
        self.identity.session_id
    }

    pub fn stream_type(&self) -> StreamType {
        self.identity.stream_type
    }

    pub fn direction(&self) -> StreamDir {
        self.identity.direction
    }

    pub fn url(&self) -> &str {
        &self.identity.url
    }

    // Lifecycle

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Opened
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }

    /// Fail unless the stream is still in `Init`.
    pub fn ensure_openable(&self) -> Result<()> {
        match self.state() {
            StreamState::Init => Ok(()),
            StreamState::Opened => Err(StreamError::AlreadyOpen),
            StreamState::Closed => Err(StreamError::NotOpen),
        }
    }

    /// `Init -> Opened`. Bumps the open counter for this type/direction.
    pub fn mark_opened(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            StreamState::Init => {
                inner.state = StreamState::Opened;
                self.counters
                    .on_open(self.identity.stream_type, self.identity.direction);
                tracing::debug!(session_id = self.identity.session_id, "state Init -> Opened");
                Ok(())
            }
            StreamState::Opened => Err(StreamError::AlreadyOpen),
            StreamState::Closed => {
                tracing::warn!(session_id = self.identity.session_id, "open on closed stream");
                Err(StreamError::NotOpen)
            }
        }
    }

    /// Move to `Closed`. Returns the previous state, so callers can tell
    /// whether this call performed the transition.
    pub fn mark_closed(&self) -> StreamState {
        let mut inner = self.inner.lock();
        let prev = inner.state;
        if prev == StreamState::Opened {
            self.counters
                .on_close(self.identity.stream_type, self.identity.direction);
        }
        if prev != StreamState::Closed {
            inner.state = StreamState::Closed;
            tracing::debug!(session_id = self.identity.session_id, from = ?prev, "state -> Closed");
        }
        prev
    }

    // Usage count

    /// Register another holder. Returns the new count.
    pub fn request(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.usage_count += 1;
        tracing::trace!(session_id = self.identity.session_id, count = inner.usage_count, "request");
        inner.usage_count
    }

    /// Drop a holder. Returns the new count.
    ///
    /// Releasing at zero is rejected with [`StreamError::DoubleRelease`]
    /// and leaves the count at zero.
    pub fn release(&self) -> Result<u32> {
        let mut inner = self.inner.lock();
        if inner.usage_count == 0 {
            tracing::warn!(session_id = self.identity.session_id, "release without matching request");
            return Err(StreamError::DoubleRelease {
                session_id: self.identity.session_id,
            });
        }
        inner.usage_count -= 1;
        tracing::trace!(session_id = self.identity.session_id, count = inner.usage_count, "release");
        Ok(inner.usage_count)
    }

    /// Scoped `request()`; the guard releases on drop.
    pub fn acquire(&self) -> SessionGuard<'_> {
        self.request();
        SessionGuard { session: self }
    }

    pub fn is_in_use(&self) -> bool {
        self.inner.lock().usage_count > 0
    }

    pub fn use_count(&self) -> u32 {
        self.inner.lock().usage_count
    }

    // Byte accounting

    pub fn add_bytes_streamed(&self, bytes: u64) {
        self.inner.lock().total_bytes_streamed += bytes;
    }

    pub fn total_bytes_streamed(&self) -> u64 {
        self.inner.lock().total_bytes_streamed
    }

    /// Snapshot the byte counter as the start of the next bitrate window.
    pub fn save_total_bytes_streamed(&self) {
        let mut inner = self.inner.lock();
        inner.total_bytes_streamed_prev = inner.total_bytes_streamed;
    }

    /// Bytes per second over a window of `duration_secs`, measured from
    /// the last [`save_total_bytes_streamed`](Self::save_total_bytes_streamed).
    /// A zero-length window yields 0.
    pub fn calc_bit_rate(&self, duration_secs: u32) -> u64 {
        let mut inner = self.inner.lock();
        inner.bit_rate = if duration_secs == 0 {
            0
        } else {
            inner
                .total_bytes_streamed
                .saturating_sub(inner.total_bytes_streamed_prev)
                / duration_secs as u64
        };
        inner.bit_rate
    }

    /// Result of the last [`calc_bit_rate`](Self::calc_bit_rate).
    pub fn bit_rate(&self) -> u64 {
        self.inner.lock().bit_rate
    }

    // PTS

    /// Record a timestamp seen by the I/O path.
    pub fn observe_pts(&self, pts: u32) {
        self.inner.lock().pts.observe(pts);
    }

    /// Promote the latest observed PTS to last-good. Returns it, or `None`
    /// if nothing has been observed.
    pub fn update_pts(&self) -> Option<u32> {
        self.inner.lock().pts.commit()
    }

    pub fn set_pts_range(&self, start_pts: u32, end_pts: u32) {
        self.inner.lock().pts.set_range(start_pts, end_pts);
    }

    pub fn set_end_pts(&self, end_pts: u32) {
        self.inner.lock().pts.set_end(end_pts);
    }

    pub fn start_pts(&self) -> u32 {
        self.inner.lock().pts.start()
    }

    pub fn end_pts(&self) -> Option<u32> {
        self.inner.lock().pts.end()
    }

    pub fn last_good_pts(&self) -> u32 {
        self.inner.lock().pts.last_good()
    }

    pub fn pts_updated(&self) -> bool {
        self.inner.lock().pts.is_updated()
    }

    /// Whole seconds between the start PTS and `cur_pts`, modulo rollover.
    pub fn elapsed_time(&self, cur_pts: u32) -> Result<u32> {
        self.inner.lock().pts.elapsed_secs(cur_pts)
    }

    /// Whole seconds between the start and end PTS.
    pub fn media_duration(&self) -> Result<u32> {
        self.inner.lock().pts.duration_secs()
    }

    // Trick play

    /// Snapshot of the current trick-play parameters.
    pub fn trick_play(&self) -> TrickPlayState {
        self.inner.lock().trick_play.clone()
    }

    pub fn trick_play_rate(&self) -> f32 {
        self.inner.lock().trick_play.play_speed
    }

    pub fn set_trick_play_rate(&self, rate: f32) {
        self.inner.lock().trick_play.set_play_speed(rate);
        tracing::debug!(session_id = self.identity.session_id, rate, "trick play rate");
    }

    pub fn trick_play_time_seek(&self) -> f32 {
        self.inner.lock().trick_play.time_pos
    }

    pub fn set_trick_play_time_seek(&self, pos: f32) {
        self.inner.lock().trick_play.set_time_pos(pos);
        tracing::debug!(session_id = self.identity.session_id, pos, "trick play time seek");
    }

    /// Seek to a position given in 45 kHz PTS ticks.
    pub fn set_trick_play_time_seek_pts(&self, seek_pts: u64) {
        self.set_trick_play_time_seek(ticks_to_secs_f32(seek_pts));
    }

    pub fn trick_play_time_range(&self) -> f32 {
        self.inner.lock().trick_play.time_range
    }

    pub fn set_trick_play_time_range(&self, range: f32) {
        self.inner.lock().trick_play.set_time_range(range);
    }

    pub fn trick_play_byte_pos(&self) -> i64 {
        self.inner.lock().trick_play.byte_pos
    }

    pub fn set_trick_play_byte_pos(&self, pos: i64) {
        self.inner.lock().trick_play.set_byte_pos(pos);
        tracing::debug!(session_id = self.identity.session_id, pos, "trick play byte seek");
    }

    pub fn trick_play_byte_size(&self) -> i64 {
        self.inner.lock().trick_play.byte_size
    }

    pub fn set_trick_play_byte_size(&self, size: i64) {
        self.inner.lock().trick_play.set_byte_size(size);
    }

    /// Parameters waiting to be applied, or `None` if nothing changed.
    pub fn pending_trick_play(&self) -> Option<TrickPlayState> {
        let inner = self.inner.lock();
        inner.trick_play.modified.then(|| inner.trick_play.clone())
    }

    /// Clear `modified` after `applied` took effect, unless a setter ran
    /// in the meantime.
    pub fn ack_trick_play(&self, applied: &TrickPlayState) -> bool {
        let mut inner = self.inner.lock();
        let current = &inner.trick_play;
        let unchanged = current.play_speed == applied.play_speed
            && current.time_pos == applied.time_pos
            && current.time_range == applied.time_range
            && current.byte_pos == applied.byte_pos
            && current.byte_size == applied.byte_size
            && current.domain == applied.domain;
        if unchanged {
            inner.trick_play.modified = false;
        }
        unchanged
    }

    pub fn reset_trick_play(&self) {
        self.inner.lock().trick_play.reset();
    }

    // Associations

    pub fn record_id(&self) -> Option<i64> {
        self.inner.lock().record_id
    }

    /// Associate a recording. Only allowed before the stream is opened.
    pub fn set_record_id(&self, record_id: Option<i64>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != StreamState::Init {
            return Err(StreamError::AlreadyOpen);
        }
        inner.record_id = record_id;
        Ok(())
    }

    /// Attach owner data without taking ownership of it.
    pub fn set_user_data<T: Any + Send + Sync>(&self, data: &Arc<T>) {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(data) as Weak<T>;
        self.inner.lock().user_data = Some(weak);
    }

    /// The owner data, if it is still alive and of type `T`.
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let weak = self.inner.lock().user_data.clone()?;
        weak.upgrade()?.downcast::<T>().ok()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.usage_count > 0 {
            tracing::error!(
                session_id = self.identity.session_id,
                count = inner.usage_count,
                "session destroyed while still in use"
            );
        }
        if inner.state == StreamState::Opened {
            tracing::warn!(session_id = self.identity.session_id, "session dropped while open");
            self.counters
                .on_close(self.identity.stream_type, self.identity.direction);
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// Holder registered through [`StreamSession::acquire`].
#[must_use = "the session is released as soon as the guard is dropped"]
pub struct SessionGuard<'a> {
    session: &'a StreamSession,
}

impl SessionGuard<'_> {
    pub fn session(&self) -> &StreamSession {
        self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let _ = self.session.release();
    }
}
