use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::{StreamDir, StreamType};
use crate::config::StreamerConfig;
use crate::error::{Result, StreamError};
use crate::recording::RecordingStore;
use crate::stream::{InputMediaStream, MediaStream, OutputMediaStream};
use crate::transport::Connector;

/// Process-wide session id allocator and open-stream counters.
///
/// Counters are diagnostic: one per (type, direction), incremented when a
/// stream opens and decremented when it closes.
#[derive(Debug)]
pub struct SessionCounters {
    next_session_id: AtomicU64,
    open: [[AtomicUsize; 2]; 3],
}

impl SessionCounters {
    fn new() -> Self {
        Self {
            next_session_id: AtomicU64::new(1),
            open: Default::default(),
        }
    }

    pub(crate) fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn on_open(&self, stream_type: StreamType, dir: StreamDir) {
        let count = self.slot(stream_type, dir).fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(?stream_type, ?dir, count, "stream opened");
    }

    pub(crate) fn on_close(&self, stream_type: StreamType, dir: StreamDir) {
        let slot = self.slot(stream_type, dir);
        let updated = slot.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match updated {
            Ok(prev) => tracing::debug!(?stream_type, ?dir, count = prev - 1, "stream closed"),
            Err(_) => tracing::error!(?stream_type, ?dir, "open counter underflow"),
        }
    }

    pub fn open_count(&self, stream_type: StreamType, dir: StreamDir) -> usize {
        self.slot(stream_type, dir).load(Ordering::SeqCst)
    }

    fn slot(&self, stream_type: StreamType, dir: StreamDir) -> &AtomicUsize {
        &self.open[stream_type.index()][dir.index()]
    }
}

/// Registry of live media streams.
///
/// Owns the [`SessionCounters`] and a map of registered streams keyed by
/// session id. A stream leaves the registry only through
/// [`destroy`](Self::destroy), which refuses while the stream's usage count
/// is non-zero. Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    counters: Arc<SessionCounters>,
    streams: Arc<RwLock<HashMap<u64, Arc<dyn MediaStream>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            counters: Arc::new(SessionCounters::new()),
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static SessionRegistry {
        static GLOBAL: OnceLock<SessionRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SessionRegistry::new)
    }

    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    /// Create and register an HTTP ingest stream for `url`.
    pub fn create_input(
        &self,
        url: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<InputMediaStream>> {
        let stream = Arc::new(InputMediaStream::new(self, url, connector)?);
        self.register(stream.clone());
        Ok(stream)
    }

    /// Create and register an egress stream serving `url`.
    pub fn create_output(
        &self,
        stream_type: StreamType,
        url: &str,
        config: &StreamerConfig,
        store: Option<Arc<dyn RecordingStore>>,
    ) -> Result<Arc<OutputMediaStream>> {
        let mut stream = OutputMediaStream::new(self, stream_type, url, config)?;
        if let Some(store) = store {
            stream = stream.with_recording_store(store);
        }
        let stream = Arc::new(stream);
        self.register(stream.clone());
        Ok(stream)
    }

    pub fn register(&self, stream: Arc<dyn MediaStream>) {
        let id = stream.session().session_id();
        self.streams.write().insert(id, stream);

        let total = self.streams.read().len();
        tracing::debug!(session_id = id, total_sessions = total, "session registered");
    }

    /// Look up a stream by session id.
    pub fn get(&self, id: u64) -> Option<Arc<dyn MediaStream>> {
        self.streams.read().get(&id).cloned()
    }

    /// Close and unregister a stream.
    ///
    /// Fails with [`StreamError::InUse`] while holders remain; the stream
    /// stays registered in that case.
    pub fn destroy(&self, id: u64) -> Result<()> {
        let stream = {
            let mut streams = self.streams.write();
            let stream = streams.get(&id).ok_or(StreamError::SessionNotFound(id))?;

            let count = stream.session().use_count();
            if count > 0 {
                tracing::warn!(session_id = id, count, "destroy refused, session in use");
                return Err(StreamError::InUse {
                    session_id: id,
                    count,
                });
            }
            streams.remove(&id)
        };

        if let Some(stream) = stream {
            if let Err(e) = stream.close() {
                tracing::warn!(session_id = id, error = %e, "close during destroy failed");
            }
            let total = self.streams.read().len();
            tracing::debug!(session_id = id, total_sessions = total, "session destroyed");
        }
        Ok(())
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.streams.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    pub fn open_count(&self, stream_type: StreamType, dir: StreamDir) -> usize {
        self.counters.open_count(stream_type, dir)
    }

    /// Open ingest streams across all protocols.
    pub fn input_session_count(&self) -> usize {
        StreamType::ALL
            .iter()
            .map(|t| self.counters.open_count(*t, StreamDir::Input))
            .sum()
    }

    pub fn output_session_count(&self, stream_type: StreamType) -> usize {
        self.counters.open_count(stream_type, StreamDir::Output)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
