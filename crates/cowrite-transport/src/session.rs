//! Per-document server
//!
//! A [`DocumentServer`] owns one document's content and history plus the
//! sessions of every client editing it. Each session gets a worker task that
//! runs that client's operations one at a time; all workers of a document
//! serialize on the state lock.
//!
//! Lock order: the state lock may be held while briefly taking the client-map
//! lock, never the reverse.

use crate::client::{ClientHandle, SendError};
use crate::error::{TransportError, TransportResult};
use crate::registry::Registry;
use cowrite_core::{
    reconcile, ClientId, Document, DocumentId, Error, Node, Operation, OperationHistory, Result,
};
use cowrite_protocol::{CloseReason, ServerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Content and history, guarded together by the state lock
struct DocumentState {
    document: Document,
    history: OperationHistory,
    /// Set once the registry has persisted and dropped this server
    retired: bool,
}

impl DocumentState {
    /// Transform, apply and append. Returns the history index of the entry.
    fn integrate(&mut self, op: &Operation) -> Result<(usize, Operation)> {
        op.validate()?;
        let unseen = self.history.since(op.base_history_index())?;
        let reconciled = self.document.record_position(&reconcile(op, unseen)?);
        self.document.apply(&reconciled)?;
        let index = self.history.push(reconciled.clone());
        Ok((index, reconciled))
    }
}

struct ClientSession {
    handle: ClientHandle,
    /// Cleared on submit, set again once the operation is integrated
    can_send: bool,
    queue: mpsc::Sender<Operation>,
    worker: JoinHandle<()>,
}

/// Document state captured atomically with a client's registration
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub contents: Node,
    /// Number of history entries already reflected in `contents`
    pub history_index: usize,
}

/// Everything a connection adapter needs after joining a document
pub struct Connected {
    pub client_id: ClientId,
    pub pipe: SubmitPipe,
    pub leave: LeaveSignal,
    pub snapshot: Snapshot,
}

/// Hands a client's operations to its worker
pub struct SubmitPipe {
    server: Arc<DocumentServer>,
    client_id: ClientId,
}

impl SubmitPipe {
    pub fn submit(&self, op: Operation) -> Result<()> {
        self.server.submit(self.client_id, op)
    }
}

/// Tells the server a client is leaving
pub struct LeaveSignal {
    server: Arc<DocumentServer>,
    client_id: ClientId,
}

impl LeaveSignal {
    pub fn leave(self) -> Result<()> {
        self.server.disconnect(self.client_id)
    }
}

pub struct DocumentServer {
    id: DocumentId,
    state: AsyncMutex<DocumentState>,
    clients: Mutex<HashMap<ClientId, ClientSession>>,
    next_client: AtomicU64,
    registry: Weak<Registry>,
}

impl DocumentServer {
    /// A server that is not managed by a registry
    pub fn new(document: Document) -> Arc<Self> {
        Self::attached(document, Weak::new())
    }

    pub(crate) fn attached(document: Document, registry: Weak<Registry>) -> Arc<Self> {
        Arc::new(Self {
            id: document.id().clone(),
            state: AsyncMutex::new(DocumentState {
                document,
                history: OperationHistory::new(),
                retired: false,
            }),
            clients: Mutex::new(HashMap::new()),
            next_client: AtomicU64::new(0),
            registry,
        })
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Current contents and history length
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().await;
        Snapshot {
            contents: state.document.content().clone(),
            history_index: state.history.len(),
        }
    }

    /// Register a client and start its worker.
    pub async fn connect(self: &Arc<Self>, handle: ClientHandle) -> TransportResult<Connected> {
        let state = self.state.lock().await;
        if state.retired {
            return Err(TransportError::Retired(self.id.to_string()));
        }

        let client_id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let (queue, rx) = mpsc::channel(1);
        let worker = tokio::spawn(Arc::clone(self).run_worker(client_id, rx));
        let snapshot = Snapshot {
            contents: state.document.content().clone(),
            history_index: state.history.len(),
        };

        self.clients.lock().insert(
            client_id,
            ClientSession {
                handle,
                can_send: true,
                queue,
                worker,
            },
        );
        drop(state);

        info!(doc_id = %self.id, client = %client_id, history = snapshot.history_index, "client connected");
        self.record_connection();

        Ok(Connected {
            client_id,
            pipe: SubmitPipe {
                server: Arc::clone(self),
                client_id,
            },
            leave: LeaveSignal {
                server: Arc::clone(self),
                client_id,
            },
            snapshot,
        })
    }

    /// Queue an operation for the client's worker.
    ///
    /// A client that submits while its previous operation is still in flight
    /// is disconnected.
    pub fn submit(&self, client_id: ClientId, op: Operation) -> Result<()> {
        let op = op.with_origin(client_id);
        let accepted = {
            let mut clients = self.clients.lock();
            let session = clients
                .get_mut(&client_id)
                .ok_or(Error::UnknownClient(client_id))?;
            if session.can_send {
                session.can_send = false;
                session.queue.try_send(op).is_ok()
            } else {
                false
            }
        };

        if !accepted {
            warn!(doc_id = %self.id, client = %client_id, "operation submitted while another is in flight");
            self.kick(client_id, CloseReason::Error, "protocol");
            return Err(Error::ProtocolViolation(format!(
                "client {} already has an operation in flight",
                client_id
            )));
        }
        Ok(())
    }

    /// Remove a client's session.
    pub fn disconnect(&self, client_id: ClientId) -> Result<()> {
        let session = self
            .remove_session(client_id)
            .ok_or(Error::UnknownClient(client_id))?;
        session.worker.abort();
        info!(doc_id = %self.id, client = %client_id, "client disconnected");
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, client_id: ClientId, mut queue: mpsc::Receiver<Operation>) {
        while let Some(op) = queue.recv().await {
            self.process(client_id, op).await;
        }
        debug!(doc_id = %self.id, client = %client_id, "worker stopped");
    }

    async fn process(&self, client_id: ClientId, op: Operation) {
        let started = Instant::now();
        let mut state = self.state.lock().await;

        let reply = match state.integrate(&op) {
            Ok((index, applied)) => {
                let history_index = index + 1;
                if applied.is_noop() {
                    debug!(doc_id = %self.id, client = %client_id, history_index, "operation reduced to a no-op");
                    self.record_operation("noop", started);
                } else {
                    self.fan_out(client_id, history_index, &applied);
                    self.record_operation("applied", started);
                }
                ServerMessage::acknowledged(history_index)
            }
            Err(e) if e.is_local() => {
                debug!(doc_id = %self.id, client = %client_id, error = %e, "operation rejected");
                self.record_operation("rejected", started);
                ServerMessage::rejected(e.to_string())
            }
            Err(e) => {
                drop(state);
                warn!(doc_id = %self.id, client = %client_id, error = %e, "closing session");
                self.kick(client_id, CloseReason::Error, "protocol");
                return;
            }
        };

        // Re-open the latch before the client can see its acknowledgement,
        // and queue the acknowledgement before any later fan-out.
        let ack = {
            let mut clients = self.clients.lock();
            match clients.get_mut(&client_id) {
                Some(session) => {
                    session.can_send = true;
                    session.handle.send_ack(reply)
                }
                None => Ok(()),
            }
        };
        if ack == Err(SendError::Full) {
            warn!(doc_id = %self.id, client = %client_id, "outbound queue full, disconnecting");
            self.kick(client_id, CloseReason::Error, "slow_consumer");
        }
        drop(state);
    }

    /// Queue `op` for every client except its origin. Called under the state lock.
    fn fan_out(&self, origin: ClientId, history_index: usize, op: &Operation) {
        let msg = match ServerMessage::operation(history_index, op) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(doc_id = %self.id, error = %e, "cannot encode operation for fan-out");
                return;
            }
        };

        let mut slow = Vec::new();
        {
            let clients = self.clients.lock();
            for (&id, session) in clients.iter().filter(|(id, _)| **id != origin) {
                match session.handle.send_operation(msg.clone()) {
                    Ok(()) => self.record_fan_out(),
                    Err(SendError::Full) => slow.push(id),
                    // adapter already gone, its leave signal removes the session
                    Err(SendError::Closed) => {}
                }
            }
        }

        for id in slow {
            warn!(doc_id = %self.id, client = %id, "outbound queue full, disconnecting");
            self.kick(id, CloseReason::Error, "slow_consumer");
        }
    }

    fn remove_session(&self, client_id: ClientId) -> Option<ClientSession> {
        let (session, now_idle) = {
            let mut clients = self.clients.lock();
            let session = clients.remove(&client_id);
            (session, clients.is_empty())
        };
        if session.is_some() {
            self.record_disconnection();
            if now_idle {
                self.schedule_close();
            }
        }
        session
    }

    /// Forcibly end a client's session.
    fn kick(&self, client_id: ClientId, reason: CloseReason, cause: &'static str) {
        if let Some(session) = self.remove_session(client_id) {
            session.handle.terminate(reason);
            session.worker.abort();
            self.record_kick(cause);
        }
    }

    /// Ask the registry to persist and drop this server once it is idle.
    fn schedule_close(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.close(&id).await {
                warn!(doc_id = %id, error = %e, "failed to close document server");
            }
        });
    }

    /// Retire the server if no client is connected, returning the bytes to persist.
    pub(crate) async fn retire_if_idle(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        if state.retired || !self.is_idle() {
            return Ok(None);
        }
        let bytes = state.document.to_bytes()?;
        state.retired = true;
        Ok(Some(bytes))
    }

    /// Undo a retirement whose persistence failed.
    pub(crate) async fn reinstate(&self) {
        self.state.lock().await.retired = false;
    }

    /// Terminate every session and retire, returning the bytes to persist.
    pub(crate) async fn retire(&self, reason: CloseReason) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        let sessions: Vec<ClientSession> = self.clients.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.handle.terminate(reason);
            session.worker.abort();
            self.record_disconnection();
        }
        state.retired = true;
        state.document.to_bytes()
    }

    fn record_connection(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics() {
            metrics.record_connection();
        }
    }

    fn record_disconnection(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics() {
            metrics.record_disconnection();
        }
    }

    fn record_operation(&self, outcome: &'static str, started: Instant) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics() {
            metrics.record_operation(outcome, started.elapsed().as_secs_f64());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = (outcome, started);
    }

    fn record_fan_out(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics() {
            metrics.operations_fanned_out.inc();
        }
    }

    fn record_kick(&self, cause: &'static str) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = self.metrics() {
            metrics.record_kick(cause);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = cause;
    }

    #[cfg(feature = "metrics")]
    fn metrics(&self) -> Option<Arc<crate::metrics::Metrics>> {
        self.registry.upgrade().and_then(|r| r.metrics().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{client_channel, ClientOutbox};
    use std::time::Duration;
    use tokio::time::timeout;

    fn server(json: &str) -> Arc<DocumentServer> {
        let id = DocumentId::new("session:test").unwrap();
        DocumentServer::new(Document::from_bytes(id, json.as_bytes()).unwrap())
    }

    async fn join(server: &Arc<DocumentServer>, capacity: usize) -> (Connected, ClientOutbox) {
        let (handle, outbox) = client_channel(capacity);
        (server.connect(handle).await.unwrap(), outbox)
    }

    async fn recv(outbox: &mut ClientOutbox) -> Option<ServerMessage> {
        timeout(Duration::from_secs(2), outbox.next()).await.unwrap()
    }

    async fn assert_quiet(outbox: &mut ClientOutbox) {
        assert!(timeout(Duration::from_millis(50), outbox.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_counter() {
        let server = server(r#"{"count": 0}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (b, mut b_out) = join(&server, 8).await;

        a.pipe.submit(Operation::integer_add("count", 1, 0)).unwrap();
        b.pipe.submit(Operation::integer_add("count", 1, 0)).unwrap();

        for outbox in [&mut a_out, &mut b_out] {
            let mut acks = 0;
            let mut ops = 0;
            for _ in 0..2 {
                match recv(outbox).await.unwrap() {
                    ServerMessage::Acknowledged { .. } => acks += 1,
                    ServerMessage::Operation { .. } => ops += 1,
                    other => panic!("unexpected message {:?}", other),
                }
            }
            assert_eq!((acks, ops), (1, 1));
            assert_quiet(outbox).await;
        }

        let snapshot = server.snapshot().await;
        assert_eq!(snapshot.contents, serde_json::from_str(r#"{"count": 2}"#).unwrap());
        assert_eq!(snapshot.history_index, 2);
    }

    #[tokio::test]
    async fn test_array_insert_race() {
        let server = server(r#"["a", "b"]"#);
        let (x, mut x_out) = join(&server, 8).await;
        let (y, mut y_out) = join(&server, 8).await;

        y.pipe.submit(Operation::array_insert("2", "y", 0)).unwrap();
        x.pipe.submit(Operation::array_insert("2", "x", 0)).unwrap();

        for _ in 0..2 {
            recv(&mut x_out).await.unwrap();
            recv(&mut y_out).await.unwrap();
        }
        assert_eq!(
            server.snapshot().await.contents,
            serde_json::from_str(r#"["a", "b", "x", "y"]"#).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fan_out_carries_transformed_operation() {
        let server = server(r#"{"items": ["a"]}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (b, mut b_out) = join(&server, 8).await;

        a.pipe.submit(Operation::array_insert("items/0", "z", 0)).unwrap();
        assert_eq!(recv(&mut a_out).await, Some(ServerMessage::acknowledged(1)));
        recv(&mut b_out).await.unwrap();

        // b has not seen a's insert yet
        b.pipe.submit(Operation::string_set("items/0", "A", 0)).unwrap();
        assert_eq!(recv(&mut b_out).await, Some(ServerMessage::acknowledged(2)));
        match recv(&mut a_out).await.unwrap() {
            ServerMessage::Operation { history_index, operation, .. } => {
                assert_eq!(history_index, 2);
                assert_eq!(operation.target_path, "items/1");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    /// History index of the next acknowledgement, skipping fanned-out operations
    async fn next_ack(outbox: &mut ClientOutbox) -> usize {
        loop {
            match recv(outbox).await.unwrap() {
                ServerMessage::Acknowledged { history_index } => return history_index,
                ServerMessage::Operation { .. } => continue,
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_client_operations_apply_in_submission_order() {
        let server = server(r#"{"list": []}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (b, mut b_out) = join(&server, 8).await;

        a.pipe.submit(Operation::array_insert("list/0", "x", 0)).unwrap();
        b.pipe.submit(Operation::array_insert("list/0", "b", 0)).unwrap();
        let first = next_ack(&mut a_out).await;

        // a builds on its own acknowledged insert
        a.pipe.submit(Operation::array_insert("list/1", "y", first)).unwrap();
        let second = next_ack(&mut a_out).await;
        next_ack(&mut b_out).await;
        assert!(first < second);

        let state = server.state.lock().await;
        let from_a: Vec<usize> = state
            .history
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, op)| op.origin() == a.client_id)
            .map(|(index, _)| index + 1)
            .collect();
        assert_eq!(from_a, vec![first, second]);
        assert_eq!(
            state.document.content(),
            &serde_json::from_str::<Node>(r#"{"list": ["x", "y", "b"]}"#).unwrap()
        );
    }

    #[tokio::test]
    async fn test_object_remove_records_position() {
        let server = server(r#"{"k": 0, "z": 1}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (b, mut b_out) = join(&server, 8).await;

        b.pipe.submit(Operation::object_remove("k", 0)).unwrap();
        assert_eq!(next_ack(&mut b_out).await, 1);
        a.pipe.submit(Operation::object_insert("k", 5i64, 0)).unwrap();
        assert_eq!(next_ack(&mut a_out).await, 2);

        assert_eq!(
            server.snapshot().await.contents,
            serde_json::from_str(r#"{"k": 5, "z": 1}"#).unwrap()
        );
    }

    #[tokio::test]
    async fn test_second_submit_in_flight_is_kicked() {
        let server = server(r#"{"n": 0}"#);
        let (a, mut a_out) = join(&server, 8).await;

        let guard = server.state.lock().await;
        a.pipe.submit(Operation::integer_add("n", 1, 0)).unwrap();
        assert!(matches!(
            a.pipe.submit(Operation::integer_add("n", 1, 0)),
            Err(Error::ProtocolViolation(_))
        ));
        drop(guard);

        assert_eq!(recv(&mut a_out).await, None);
        assert_eq!(a_out.close_reason(), CloseReason::Error);
        assert_eq!(server.client_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_operation_keeps_session() {
        let server = server(r#"{"n": 0}"#);
        let (a, mut a_out) = join(&server, 8).await;

        a.pipe.submit(Operation::integer_add("missing", 1, 0)).unwrap();
        assert!(matches!(recv(&mut a_out).await, Some(ServerMessage::Rejected { .. })));

        a.pipe.submit(Operation::integer_add("n", 1, 0)).unwrap();
        assert_eq!(recv(&mut a_out).await, Some(ServerMessage::acknowledged(1)));
    }

    #[tokio::test]
    async fn test_base_ahead_of_history_is_kicked() {
        let server = server("[]");
        let (a, mut a_out) = join(&server, 8).await;

        a.pipe.submit(Operation::array_insert("0", 1i64, 5)).unwrap();
        assert_eq!(recv(&mut a_out).await, None);
        assert_eq!(a_out.close_reason(), CloseReason::Error);
    }

    #[tokio::test]
    async fn test_noop_is_acknowledged_not_fanned_out() {
        let server = server(r#"{"items": [{"done": false}]}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (b, mut b_out) = join(&server, 8).await;

        a.pipe.submit(Operation::array_remove("items/0", 0)).unwrap();
        assert_eq!(recv(&mut a_out).await, Some(ServerMessage::acknowledged(1)));
        assert!(matches!(recv(&mut b_out).await, Some(ServerMessage::Operation { .. })));

        b.pipe.submit(Operation::boolean_set("items/0/done", true, 0)).unwrap();
        assert_eq!(recv(&mut b_out).await, Some(ServerMessage::acknowledged(2)));
        assert_quiet(&mut a_out).await;

        let snapshot = server.snapshot().await;
        assert_eq!(snapshot.history_index, 2);
        assert_eq!(snapshot.contents, serde_json::from_str(r#"{"items": []}"#).unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_on_connect() {
        let server = server(r#"{"title": "draft"}"#);
        let (a, mut a_out) = join(&server, 8).await;
        a.pipe.submit(Operation::text_replace("title", 0, 5, "final", 0)).unwrap();
        recv(&mut a_out).await.unwrap();

        let (late, _late_out) = join(&server, 8).await;
        assert_eq!(late.snapshot.history_index, 1);
        assert_eq!(
            late.snapshot.contents,
            serde_json::from_str(r#"{"title": "final"}"#).unwrap()
        );
        assert_ne!(late.client_id, a.client_id);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_kicked() {
        let server = server(r#"{"n": 0}"#);
        let (a, mut a_out) = join(&server, 8).await;
        let (_slow, mut slow_out) = join(&server, 1).await;

        a.pipe.submit(Operation::integer_add("n", 1, 0)).unwrap();
        recv(&mut a_out).await.unwrap();
        a.pipe.submit(Operation::integer_add("n", 1, 1)).unwrap();
        recv(&mut a_out).await.unwrap();

        assert_eq!(server.client_count(), 1);
        assert_eq!(recv(&mut slow_out).await, None);
        assert_eq!(slow_out.close_reason(), CloseReason::Error);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let server = server("[]");
        let (a, _a_out) = join(&server, 8).await;
        let id = a.client_id;

        a.leave.leave().unwrap();
        assert!(server.is_idle());
        assert!(matches!(server.disconnect(id), Err(Error::UnknownClient(_))));
        assert!(matches!(
            server.submit(id, Operation::array_insert("0", 1i64, 0)),
            Err(Error::UnknownClient(_))
        ));
    }
}
