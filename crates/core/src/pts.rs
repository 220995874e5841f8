//! Presentation timestamps (PTS) on a 45 kHz clock.
//!
//! Streams carry PTS values as 32-bit tick counts at 45 kHz. The counter
//! wraps every 2^32 / 45000 s (about 26.5 hours), so all deltas are taken
//! with wrapping subtraction: as long as the true elapsed time is shorter
//! than one rollover period the forward delta is exact.
//!
//! ## MPEG-TS timestamp signaling
//!
//! Ingest streams are MPEG transport streams. PES headers carry a 33-bit PTS
//! on a 90 kHz clock (ISO/IEC 13818-1 §2.4.3.7); dropping the low bit yields
//! the 45 kHz value used here.
//!
//! ```text
//! TS packet (188 bytes): 0x47 | PUSI/PID | flags | [adaptation] | payload
//! PES payload start:     00 00 01 | stream_id | len(2) | flags(2) | hdr_len | PTS(5)
//! ```

use crate::error::{Result, StreamError};

/// PTS ticks per second.
pub const PTS_TIMEBASE: u32 = 45_000;

/// MPEG-TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// MPEG-TS sync byte value.
pub const SYNC_BYTE: u8 = 0x47;

/// Forward distance in ticks from `from` to `to`, modulo 2^32.
pub fn pts_delta(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

/// Convert 45 kHz ticks to whole seconds.
pub fn ticks_to_secs(ticks: u32) -> u32 {
    ticks / PTS_TIMEBASE
}

/// Convert 45 kHz ticks to fractional seconds.
pub fn ticks_to_secs_f32(ticks: u64) -> f32 {
    (ticks as f64 / PTS_TIMEBASE as f64) as f32
}

/// PTS bookkeeping for one session.
///
/// The I/O path reports every timestamp it sees through
/// [`observe`](Self::observe); [`commit`](Self::commit) promotes the latest
/// observation to the last known-good value that time queries use.
#[derive(Debug, Clone, Default)]
pub struct PtsClock {
    latest: Option<u32>,
    start: u32,
    end: Option<u32>,
    last_good: u32,
    updated: bool,
}

impl PtsClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timestamp seen on the wire.
    pub fn observe(&mut self, pts: u32) {
        self.latest = Some(pts);
    }

    /// Promote the latest observation. The first commit fixes `start`.
    pub fn commit(&mut self) -> Option<u32> {
        let pts = self.latest?;
        if !self.updated {
            self.start = pts;
            self.updated = true;
        }
        self.last_good = pts;
        Some(pts)
    }

    /// Set explicit bounds, e.g. from a recording index.
    pub fn set_range(&mut self, start: u32, end: u32) {
        self.start = start;
        self.end = Some(end);
        if !self.updated {
            self.last_good = start;
            self.updated = true;
        }
    }

    pub fn set_end(&mut self, end: u32) {
        self.end = Some(end);
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> Option<u32> {
        self.end
    }

    pub fn last_good(&self) -> u32 {
        self.last_good
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Whole seconds from `start` to `cur_pts`.
    pub fn elapsed_secs(&self, cur_pts: u32) -> Result<u32> {
        if !self.updated {
            return Err(StreamError::PtsNotAvailable);
        }
        Ok(ticks_to_secs(pts_delta(self.start, cur_pts)))
    }

    /// Whole seconds from `start` to `end`.
    pub fn duration_secs(&self) -> Result<u32> {
        match self.end {
            Some(end) if self.updated => Ok(ticks_to_secs(pts_delta(self.start, end))),
            _ => Err(StreamError::PtsNotAvailable),
        }
    }
}

/// Extracts PES timestamps from a transport stream delivered in arbitrary
/// chunks. Partial packets are carried over to the next call.
#[derive(Debug, Default)]
pub struct TsPtsScanner {
    carry: Vec<u8>,
}

impl TsPtsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return the last PTS (45 kHz) it completed.
    pub fn feed(&mut self, data: &[u8]) -> Option<u32> {
        self.carry.extend_from_slice(data);

        let mut last = None;
        let mut offset = 0;
        while self.carry.len() - offset >= TS_PACKET_SIZE {
            if self.carry[offset] != SYNC_BYTE {
                match self.carry[offset + 1..].iter().position(|&b| b == SYNC_BYTE) {
                    Some(skip) => offset += 1 + skip,
                    None => offset = self.carry.len(),
                }
                continue;
            }
            if let Some(pts) = packet_pts(&self.carry[offset..offset + TS_PACKET_SIZE]) {
                last = Some(pts);
            }
            offset += TS_PACKET_SIZE;
        }
        self.carry.drain(..offset);
        last
    }

    /// Drop any buffered partial packet (after a seek).
    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

/// PTS of a TS packet that starts a PES packet, halved to 45 kHz.
fn packet_pts(packet: &[u8]) -> Option<u32> {
    let pusi = packet.get(1)? & 0x40 != 0;
    if !pusi {
        return None;
    }

    let afc = (packet.get(3)? >> 4) & 0x03;
    let mut offset = 4;
    if afc & 0x02 != 0 {
        offset += 1 + *packet.get(4)? as usize;
    }
    if afc & 0x01 == 0 {
        return None;
    }

    let pes = packet.get(offset..)?;
    if pes.get(..3)? != [0x00, 0x00, 0x01] {
        return None;
    }
    if !stream_has_pts(*pes.get(3)?) {
        return None;
    }
    if pes.get(7)? & 0x80 == 0 {
        return None;
    }

    let ts = pes.get(9..14)?;
    let value = ((ts[0] as u64 & 0x0E) << 29)
        | ((ts[1] as u64) << 22)
        | ((ts[2] as u64 & 0xFE) << 14)
        | ((ts[3] as u64) << 7)
        | ((ts[4] as u64) >> 1);

    Some((value >> 1) as u32)
}

/// Audio, video and private stream 1 carry the optional PES header.
fn stream_has_pts(stream_id: u8) -> bool {
    matches!(stream_id, 0xBD | 0xC0..=0xEF)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a TS packet carrying the start of a video PES with `pts90k`.
    pub(crate) fn pes_packet(pts90k: u64) -> Vec<u8> {
        let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40 | 0x01; // PUSI, PID high bits
        packet[2] = 0x00;
        packet[3] = 0x10; // payload only
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
            0x21 | (((pts90k >> 30) as u8 & 0x07) << 1),
            (pts90k >> 22) as u8,
            0x01 | (((pts90k >> 15) as u8) << 1),
            (pts90k >> 7) as u8,
            0x01 | ((pts90k as u8) << 1),
        ];
        packet[4..4 + pes.len()].copy_from_slice(&pes);
        packet
    }

    #[test]
    fn elapsed_without_wrap() {
        let mut clock = PtsClock::new();
        clock.observe(1_000);
        clock.commit();
        assert_eq!(clock.elapsed_secs(1_000 + 10 * PTS_TIMEBASE).unwrap(), 10);
    }

    #[test]
    fn elapsed_across_rollover() {
        let mut clock = PtsClock::new();
        let start = u32::MAX - 45_000; // one second before wrap
        clock.observe(start);
        clock.commit();

        // Numerically smaller than start, three seconds later.
        let cur = start.wrapping_add(3 * PTS_TIMEBASE);
        assert!(cur < start);
        assert_eq!(clock.elapsed_secs(cur).unwrap(), 3);
    }

    #[test]
    fn elapsed_before_any_pts() {
        let clock = PtsClock::new();
        assert!(matches!(
            clock.elapsed_secs(90_000),
            Err(StreamError::PtsNotAvailable)
        ));
    }

    #[test]
    fn duration_requires_end() {
        let mut clock = PtsClock::new();
        clock.observe(0);
        clock.commit();
        assert!(matches!(
            clock.duration_secs(),
            Err(StreamError::PtsNotAvailable)
        ));

        clock.set_end(60 * PTS_TIMEBASE);
        assert_eq!(clock.duration_secs().unwrap(), 60);
    }

    #[test]
    fn first_commit_fixes_start() {
        let mut clock = PtsClock::new();
        assert_eq!(clock.commit(), None);
        clock.observe(500);
        clock.commit();
        clock.observe(900);
        clock.commit();
        assert_eq!(clock.start(), 500);
        assert_eq!(clock.last_good(), 900);
    }

    #[test]
    fn scanner_extracts_pts() {
        let mut scanner = TsPtsScanner::new();
        let packet = pes_packet(180_000);
        assert_eq!(scanner.feed(&packet), Some(90_000));
    }

    #[test]
    fn scanner_handles_split_packets() {
        let mut scanner = TsPtsScanner::new();
        let packet = pes_packet(900_000);
        assert_eq!(scanner.feed(&packet[..100]), None);
        assert_eq!(scanner.feed(&packet[100..]), Some(450_000));
    }

    #[test]
    fn scanner_resyncs_after_garbage() {
        let mut scanner = TsPtsScanner::new();
        let mut data = vec![0x00, 0x12, 0x34];
        data.extend(pes_packet(90_000));
        assert_eq!(scanner.feed(&data), Some(45_000));
    }

    #[test]
    fn scanner_ignores_continuation_packets() {
        let mut scanner = TsPtsScanner::new();
        let mut packet = pes_packet(90_000);
        packet[1] = 0x01; // clear PUSI
        assert_eq!(scanner.feed(&packet), None);
    }
}
