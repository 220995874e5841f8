//! Stream lifecycle events and the teardown rendezvous.
//!
//! The control plane talks to an output stream's notifier thread through a
//! channel of [`StreamEvent`]s. When the notifier has finished tearing the
//! stream down it fires a [`SessionDone`], which the owner waits on with a
//! bounded timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Events consumed by [`OutputMediaStream::run_event_notifier`](crate::OutputMediaStream::run_event_notifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Stop streaming and close the client connection.
    StopRequest,
    /// Response metadata is known; send the response head to the client.
    HeaderReady {
        status: u16,
        reason: String,
        /// Include DLNA streaming headers.
        dlna: bool,
    },
}

impl StreamEvent {
    /// `200 OK` with DLNA headers.
    pub fn dlna_ok() -> Self {
        StreamEvent::HeaderReady {
            status: 200,
            reason: "OK".to_string(),
            dlna: true,
        }
    }
}

/// One-shot completion signal shared between a notifier and the owner.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct SessionDone {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl SessionDone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session done and wake all waiters. Returns `false` if it
    /// had already been signaled.
    pub fn signal(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock();
        if *done {
            return false;
        }
        *done = true;
        cvar.notify_all();
        true
    }

    /// Block until signaled or `timeout` elapses. Returns whether the
    /// signal was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock();
        if !*done {
            let _ = cvar.wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.0.lock()
    }
}
