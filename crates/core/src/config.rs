use std::time::Duration;

use crate::trickplay::SeekSupport;

/// Server agent advertised in every HTTP response.
pub const SERVER_AGENT: &str = "mediastream-rs/0.1 DLNADOC/1.50";

/// Library-wide configuration used by streams and the relay server.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Value of the `Server` response header.
    pub server_agent: String,
    /// `Content-Type` of served media.
    pub content_type: String,
    /// DLNA profile name for `contentFeatures.dlna.org` (`DLNA.ORG_PN`).
    /// Omitted from the header when `None`.
    pub dlna_profile: Option<String>,
    /// Seek domains advertised by output streams.
    pub seek_support: SeekSupport,
    /// Upstream TCP connect timeout.
    pub connect_timeout: Duration,
    /// Upstream and client socket read timeout. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// How often the notifier re-checks the stream state while idle.
    pub notifier_poll_interval: Duration,
    /// How long an owner waits for the notifier to finish teardown.
    pub session_done_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            server_agent: SERVER_AGENT.to_string(),
            content_type: "video/mpeg".to_string(),
            dlna_profile: Some("MPEG_TS_HD_NA_ISO".to_string()),
            seek_support: SeekSupport::Byte,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(30)),
            notifier_poll_interval: Duration::from_millis(50),
            session_done_timeout: Duration::from_secs(30),
        }
    }
}
