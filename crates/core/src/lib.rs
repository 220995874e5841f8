pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod pts;
pub mod recording;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;
pub mod trickplay;

pub use config::StreamerConfig;
pub use error::{Result, StreamError};
pub use notify::{SessionDone, StreamEvent};
pub use recording::{MemoryRecordingStore, RecordingStore};
pub use server::Server;
pub use session::{SessionGuard, SessionRegistry, StreamDir, StreamSession, StreamState, StreamType};
pub use stream::{ClientConnection, ClientId, InputMediaStream, InputReader, MediaStream, OutputMediaStream, StreamRequest};
pub use transport::{Connector, HttpConnector, Transport};
pub use trickplay::{SeekDomain, SeekSupport, TrickPlayState};
