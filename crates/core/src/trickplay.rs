//! Trick-play state (fast-forward, rewind, seek).
//!
//! A seek can be expressed in one of two domains:
//!
//! - **Time**: a position in seconds (`TimeSeekRange.dlna.org` on the wire).
//! - **Byte**: an offset into the stream (`Range: bytes=` on the wire).
//!
//! Whichever domain was set last is authoritative. Every setter raises the
//! `modified` flag; the I/O path that applies the settings clears it.

/// Seek domain of a trick-play request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDomain {
    Time,
    Byte,
}

/// Which seek domains a stream can honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekSupport {
    /// Linear playback only.
    None,
    /// Time-based seeking (e.g. recordings with a PTS index).
    Time,
    /// Byte-range seeking.
    #[default]
    Byte,
    /// Both time and byte seeking.
    Both,
}

impl SeekSupport {
    pub fn supports_time(self) -> bool {
        matches!(self, SeekSupport::Time | SeekSupport::Both)
    }

    pub fn supports_byte(self) -> bool {
        matches!(self, SeekSupport::Byte | SeekSupport::Both)
    }
}

/// Current trick-play parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrickPlayState {
    /// Playback rate, 1.0 is normal speed. Negative values rewind.
    pub play_speed: f32,
    /// Seek position in seconds.
    pub time_pos: f32,
    /// Seekable time range in seconds.
    pub time_range: f32,
    /// Seek position in bytes.
    pub byte_pos: i64,
    /// Number of bytes requested from `byte_pos`, 0 for open-ended.
    pub byte_size: i64,
    /// Set by every setter, cleared once the change has been applied.
    pub modified: bool,
    /// Domain set last, `None` after reset.
    pub domain: Option<SeekDomain>,
}

impl TrickPlayState {
    pub fn new() -> Self {
        Self {
            play_speed: 1.0,
            time_pos: 0.0,
            time_range: 0.0,
            byte_pos: 0,
            byte_size: 0,
            modified: false,
            domain: None,
        }
    }

    /// Back to normal playback with no pending change.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn set_play_speed(&mut self, speed: f32) {
        self.play_speed = speed;
        self.modified = true;
    }

    pub fn set_time_pos(&mut self, pos: f32) {
        self.time_pos = pos;
        self.domain = Some(SeekDomain::Time);
        self.modified = true;
    }

    pub fn set_time_range(&mut self, range: f32) {
        self.time_range = range;
        self.modified = true;
    }

    pub fn set_byte_pos(&mut self, pos: i64) {
        self.byte_pos = pos;
        self.domain = Some(SeekDomain::Byte);
        self.modified = true;
    }

    pub fn set_byte_size(&mut self, size: i64) {
        self.byte_size = size;
        self.domain = Some(SeekDomain::Byte);
        self.modified = true;
    }

    /// Whether playback runs at a rate other than 1.0.
    pub fn is_trick_mode(&self) -> bool {
        (self.play_speed - 1.0).abs() > f32::EPSILON
    }
}

impl Default for TrickPlayState {
    fn default() -> Self {
        Self::new()
    }
}
