// src/events.rs
// Fan-out engine: live user→session registry and the delivery worker

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::Session;

const QUEUE_CAPACITY: usize = 1024;
/// Pause between dequeues, coalescing bursts for client-side rendering.
const DRAIN_PAUSE: Duration = Duration::from_millis(10);

/// One server-initiated frame, prebuilt so the worker never needs to hold a
/// chat lock while sending.
#[derive(Debug)]
pub struct Event {
    pub prefix: &'static str,
    pub data: Vec<u8>,
    pub recipients: Vec<String>,
}

/// Process-wide registry of authenticated sessions plus the bounded FIFO
/// event queue feeding the single delivery worker.
pub struct EventEngine {
    registry: RwLock<HashMap<String, Vec<Arc<Session>>>>,
    tx: mpsc::Sender<Event>,
}

impl EventEngine {
    pub fn new() -> (Arc<Self>, EventWorker) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let engine = Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            tx,
        });
        let worker = EventWorker {
            engine: engine.clone(),
            rx,
        };
        (engine, worker)
    }

    /// Register a session for event delivery once it has authenticated.
    pub fn register(&self, user_id: &str, session: Arc<Session>) {
        let mut registry = self.registry.write();
        let sessions = registry.entry(user_id.to_string()).or_default();
        if !sessions.iter().any(|s| s.id() == session.id()) {
            sessions.push(session);
        }
    }

    /// Drop a session from the registry on any termination path.
    pub fn unregister(&self, user_id: &str, session_id: u64) {
        let mut registry = self.registry.write();
        if let Some(sessions) = registry.get_mut(user_id) {
            sessions.retain(|s| s.id() != session_id);
            if sessions.is_empty() {
                registry.remove(user_id);
            }
        }
    }

    /// Enqueue an event. Never blocks the calling handler; a full queue
    /// drops the event with a warning.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("event queue rejected event: {e}");
        }
    }

    fn sessions_for(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.registry
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn registered_count(&self, user_id: &str) -> usize {
        self.sessions_for(user_id).len()
    }
}

/// The single consumer of the event queue. Send errors are logged and
/// swallowed; the reader loop of the affected session detects real
/// disconnects and unregisters it.
pub struct EventWorker {
    engine: Arc<EventEngine>,
    rx: mpsc::Receiver<Event>,
}

impl EventWorker {
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            tokio::time::sleep(DRAIN_PAUSE).await;
            debug!(
                prefix = event.prefix,
                recipients = event.recipients.len(),
                "delivering event"
            );
            for user_id in &event.recipients {
                for session in self.engine.sessions_for(user_id) {
                    if let Err(e) = session.send(event.prefix, &event.data).await {
                        warn!(
                            user = %user_id,
                            session = session.id(),
                            "event delivery failed: {e}"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SessionCipher;
    use tokio::net::{TcpListener, TcpStream};

    async fn dummy_session() -> Arc<Session> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let _peer = listener.accept().await.unwrap();
        let peer_addr = client.peer_addr().unwrap();
        let (_read, write) = client.into_split();
        let cipher = SessionCipher::new(&[0u8; 32]).unwrap();
        Arc::new(Session::new(peer_addr, write, cipher))
    }

    #[tokio::test]
    async fn register_is_idempotent_per_session() {
        let (engine, _worker) = EventEngine::new();
        let session = dummy_session().await;

        engine.register("alice", session.clone());
        engine.register("alice", session.clone());
        assert_eq!(engine.registered_count("alice"), 1);

        engine.unregister("alice", session.id());
        assert_eq!(engine.registered_count("alice"), 0);
    }

    #[tokio::test]
    async fn unregister_keeps_other_sessions() {
        let (engine, _worker) = EventEngine::new();
        let first = dummy_session().await;
        let second = dummy_session().await;

        engine.register("alice", first.clone());
        engine.register("alice", second.clone());
        engine.unregister("alice", first.id());

        let remaining = engine.sessions_for("alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), second.id());
    }
}
