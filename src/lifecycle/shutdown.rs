//! Shutdown coordination for the stack.

use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide shutdown flag.
///
/// Sockets poll it through `Multiplexer::shutdown()`; the accept loop and
/// the socket tasks await it.
#[derive(Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn trigger(&self) {
        if !self.state.send_replace(true) {
            tracing::info!("Shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once shutdown has been triggered, even if that happened
    /// before this call.
    pub async fn wait(&self) {
        let mut state = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = state.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
