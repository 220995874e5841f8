//! DLNA streaming headers (DLNA Guidelines, Part 1-1 §7.4).
//!
//! A DLNA media server decorates plain HTTP responses with:
//!
//! | Header | Meaning |
//! |--------|---------|
//! | `transferMode.dlna.org` | `Streaming` for A/V content |
//! | `contentFeatures.dlna.org` | profile, seek operations, play speeds, flags |
//! | `TimeSeekRange.dlna.org` | served time window, `npt=start-end/duration` |
//! | `PlaySpeed.dlna.org` | active trick-play rate, `speed=N` |
//!
//! `DLNA.ORG_OP` advertises seek support as two digits: time seek, then
//! byte seek (`10` time only, `01` byte only, `11` both).

use crate::trickplay::SeekSupport;

pub const TRANSFER_MODE: &str = "transferMode.dlna.org";
pub const CONTENT_FEATURES: &str = "contentFeatures.dlna.org";
pub const TIME_SEEK_RANGE: &str = "TimeSeekRange.dlna.org";
pub const PLAY_SPEED: &str = "PlaySpeed.dlna.org";

/// `DLNA.ORG_FLAGS`: streaming transfer mode, background transfer mode,
/// connection stall, DLNA v1.5.
const STREAMING_FLAGS: &str = "01700000000000000000000000000000";

/// Trick-play speeds advertised when time seek is available.
const PLAY_SPEEDS: &str = "-64,-32,-16,-8,-4,-2,-1/2,1/2,2,4,8,16,32,64";

/// Render the `contentFeatures.dlna.org` value.
pub fn content_features(profile: Option<&str>, seek: SeekSupport) -> String {
    let mut fields = Vec::new();
    if let Some(profile) = profile {
        fields.push(format!("DLNA.ORG_PN={}", profile));
    }
    fields.push(format!(
        "DLNA.ORG_OP={}{}",
        u8::from(seek.supports_time()),
        u8::from(seek.supports_byte())
    ));
    if seek.supports_time() {
        fields.push(format!("DLNA.ORG_PS={}", PLAY_SPEEDS));
    }
    fields.push("DLNA.ORG_CI=0".to_string());
    fields.push(format!("DLNA.ORG_FLAGS={}", STREAMING_FLAGS));
    fields.join(";")
}

/// Render the `TimeSeekRange.dlna.org` value for a window starting at
/// `pos` within a range of `range` seconds. An unknown range is `*`.
pub fn time_seek_range(pos: f32, range: f32) -> String {
    if range > 0.0 {
        format!("npt={:.3}-{:.3}/{:.3}", pos, range, range)
    } else {
        format!("npt={:.3}-/*", pos)
    }
}

/// Render the `PlaySpeed.dlna.org` value.
pub fn play_speed(speed: f32) -> String {
    if speed.fract() == 0.0 {
        format!("speed={}", speed as i32)
    } else if (1.0 / speed).fract() == 0.0 {
        let den = (1.0 / speed) as i32;
        let sign = if den < 0 { "-" } else { "" };
        format!("speed={}1/{}", sign, den.abs())
    } else {
        format!("speed={}", speed)
    }
}

/// Parse a `Range: bytes=first-[last]` value.
pub fn parse_byte_range(value: &str) -> Option<(i64, Option<i64>)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (first, last) = spec.split_once('-')?;
    let first = first.trim().parse::<i64>().ok()?;
    let last = match last.trim() {
        "" => None,
        last => Some(last.parse::<i64>().ok()?),
    };
    if first < 0 || last.is_some_and(|last| last < first) {
        return None;
    }
    Some((first, last))
}

/// Parse a `TimeSeekRange.dlna.org: npt=start-[end]` value into seconds.
pub fn parse_npt_range(value: &str) -> Option<(f32, Option<f32>)> {
    let spec = value.trim().strip_prefix("npt=")?;
    let spec = spec.split('/').next()?;
    let (start, end) = spec.split_once('-')?;
    let start = parse_npt_time(start)?;
    let end = match end.trim() {
        "" => None,
        end => Some(parse_npt_time(end)?),
    };
    Some((start, end))
}

/// Parse an NPT time, either `seconds[.fraction]` or `h:mm:ss[.fraction]`.
pub fn parse_npt_time(value: &str) -> Option<f32> {
    let value = value.trim();
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [secs] => secs.parse::<f32>().ok().filter(|s| *s >= 0.0),
        [h, m, s] => {
            let h = h.parse::<u32>().ok()?;
            let m = m.parse::<u32>().ok()?;
            let s = s.parse::<f32>().ok()?;
            if m >= 60 || !(0.0..60.0).contains(&s) {
                return None;
            }
            let whole = h.checked_mul(3600)?.checked_add(m * 60)?;
            Some(whole as f32 + s)
        }
        _ => None,
    }
}

/// Parse a `PlaySpeed.dlna.org: speed=N` value, where N may be a fraction.
pub fn parse_play_speed(value: &str) -> Option<f32> {
    let speed = value.trim().strip_prefix("speed=")?;
    let rate = match speed.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f32>().ok()?;
            let den = den.trim().parse::<f32>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => speed.trim().parse::<f32>().ok()?,
    };
    (rate != 0.0).then_some(rate)
}
