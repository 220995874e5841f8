use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crate::config::StreamerConfig;
use crate::error::{Result, StreamError};
use crate::recording::RecordingStore;
use crate::session::SessionRegistry;
use crate::transport::tcp::{self, RelayContext};
use crate::transport::{Connector, HttpConnector};

/// HTTP/DLNA relay server.
///
/// Each client request is mapped onto `upstream_base` + request path,
/// pulled through an [`InputMediaStream`](crate::InputMediaStream) and
/// served through an [`OutputMediaStream`](crate::OutputMediaStream). Both
/// streams live in the server's [`SessionRegistry`] for the duration of the
/// request. Connection handling is delegated to [`transport::tcp`](crate::transport::tcp).
pub struct Server {
    registry: SessionRegistry,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    upstream_base: String,
    connector: Option<Arc<dyn Connector>>,
    store: Option<Arc<dyn RecordingStore>>,
    config: Arc<StreamerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str, upstream_base: &str) -> Self {
        Self::with_config(bind_addr, upstream_base, StreamerConfig::default())
    }

    /// Create a server with custom stream configuration.
    pub fn with_config(bind_addr: &str, upstream_base: &str, config: StreamerConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            upstream_base: upstream_base.to_string(),
            connector: None,
            store: None,
            config: Arc::new(config),
        }
    }

    /// Replace the upstream connector (defaults to [`HttpConnector`]).
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Resolve recording PTS ranges for served streams through `store`.
    pub fn with_recording_store(mut self, store: Arc<dyn RecordingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let connector: Arc<dyn Connector> = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(HttpConnector::new(&self.config)?),
        };

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let ctx = RelayContext {
            registry: self.registry.clone(),
            config: self.config.clone(),
            upstream_base: self.upstream_base.clone(),
            connector,
            store: self.store.clone(),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        };

        tracing::info!(addr = %local_addr, upstream = %self.upstream_base, "relay server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, ctx, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> Arc<StreamerConfig> {
        self.config.clone()
    }
}
