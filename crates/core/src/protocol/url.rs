use ::url::Url;

use crate::error::{Result, StreamError};
use crate::session::StreamType;

/// Longest media URL accepted, in bytes.
pub const MAX_URL_LEN: usize = 1024;

/// A parsed media URL.
///
/// `http`, `rtsp` and `rtp` URLs are recognized; the scheme selects the
/// [`StreamType`]. Every URL must name a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrl {
    pub stream_type: StreamType,
    url: Url,
}

impl MediaUrl {
    pub fn parse(url: &str) -> Result<Self> {
        check_url_len(url)?;

        let parsed = Url::parse(url).map_err(|e| StreamError::InvalidUrl(format!("{}: {}", url, e)))?;
        let stream_type = match parsed.scheme() {
            "http" => StreamType::Http,
            "rtsp" => StreamType::Rtsp,
            "rtp" => StreamType::Rtp,
            other => {
                return Err(StreamError::InvalidUrl(format!("unsupported scheme: {}", other)));
            }
        };
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(StreamError::InvalidUrl(format!("missing host: {}", url)));
        }

        Ok(MediaUrl {
            stream_type,
            url: parsed,
        })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }
}

/// Reject URLs longer than [`MAX_URL_LEN`].
pub fn check_url_len(url: &str) -> Result<()> {
    if url.len() > MAX_URL_LEN {
        return Err(StreamError::InvalidUrl(format!(
            "URL is {} bytes, limit is {}",
            url.len(),
            MAX_URL_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_http_url() {
        let url = MediaUrl::parse("http://192.168.1.5:8080/vldms/live.ts?ch=5").unwrap();
        assert_eq!(url.stream_type, StreamType::Http);
        assert_eq!(url.as_url().host_str(), Some("192.168.1.5"));
        assert_eq!(url.as_url().port(), Some(8080));
        assert_eq!(url.as_url().path(), "/vldms/live.ts");
        assert_eq!(url.as_url().query(), Some("ch=5"));
    }

    #[test]
    fn scheme_selects_stream_type() {
        assert_eq!(MediaUrl::parse("rtsp://host/a").unwrap().stream_type, StreamType::Rtsp);
        assert_eq!(MediaUrl::parse("rtp://239.0.0.1:5004").unwrap().stream_type, StreamType::Rtp);
    }

    #[test]
    fn ipv6_host() {
        let url = MediaUrl::parse("http://[::1]:9000/a").unwrap();
        assert_eq!(url.as_url().host_str(), Some("[::1]"));
        assert_eq!(url.as_url().port(), Some(9000));
    }

    #[test]
    fn rejects_malformed() {
        assert!(MediaUrl::parse("ftp://host/a").is_err());
        assert!(MediaUrl::parse("http://:80/a").is_err());
        assert!(MediaUrl::parse("http://host:port/a").is_err());
        assert!(MediaUrl::parse("not a url").is_err());
    }

    #[test]
    fn rejects_overlong() {
        let url = format!("http://host/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(MediaUrl::parse(&url), Err(StreamError::InvalidUrl(_))));
    }
}
