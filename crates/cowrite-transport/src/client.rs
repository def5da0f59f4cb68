//! Outgoing signal channels of one client session
//!
//! The document server writes to a [`ClientHandle`]; the connection adapter
//! drains the matching [`ClientOutbox`] onto the socket. Operations and
//! acknowledgements share one queue so a client sees them in history order.

use cowrite_protocol::{CloseReason, ServerMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Why a message could not be queued for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The client is not draining its queue
    Full,
    /// The session has ended
    Closed,
}

/// Server side of a client's outgoing channels
#[derive(Debug, Clone)]
pub struct ClientHandle {
    outbound: mpsc::Sender<ServerMessage>,
    terminate: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

/// Adapter side of a client's outgoing channels
#[derive(Debug)]
pub struct ClientOutbox {
    outbound: mpsc::Receiver<ServerMessage>,
    terminate: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

/// Create the channels for one session
pub fn client_channel(capacity: usize) -> (ClientHandle, ClientOutbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let terminate = CancellationToken::new();
    let reason = Arc::new(Mutex::new(None));

    let handle = ClientHandle {
        outbound: tx,
        terminate: terminate.clone(),
        reason: reason.clone(),
    };
    let outbox = ClientOutbox {
        outbound: rx,
        terminate,
        reason,
    };
    (handle, outbox)
}

impl ClientHandle {
    /// Queue another client's operation without waiting
    pub fn send_operation(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.queue(msg)
    }

    /// Queue an acknowledgement or rejection for this client's own operation
    pub fn send_ack(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.queue(msg)
    }

    fn queue(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.outbound.try_send(msg).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// End the session. The first reason given wins.
    pub fn terminate(&self, reason: CloseReason) {
        self.reason.lock().get_or_insert(reason);
        self.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once the session has been told to end
    pub async fn terminated(&self) {
        self.terminate.cancelled().await
    }
}

impl ClientOutbox {
    /// Next message for the socket, or `None` once the session is terminated.
    pub async fn next(&mut self) -> Option<ServerMessage> {
        tokio::select! {
            biased;
            _ = self.terminate.cancelled() => None,
            msg = self.outbound.recv() => msg,
        }
    }

    pub fn close_reason(&self) -> CloseReason {
        (*self.reason.lock()).unwrap_or(CloseReason::Terminating)
    }
}
