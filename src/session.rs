// src/session.rs
// One live client connection: shared writer, session cipher, identity

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::wire::{SessionCipher, write_frame};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-connection state after a completed handshake. The writer is shared
/// between the session's read loop (replies) and the event worker (pushed
/// frames); the mutex keeps whole frames atomic on the wire.
pub struct Session {
    id: u64,
    addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    cipher: SessionCipher,
    user_id: RwLock<Option<String>>,
}

impl Session {
    pub fn new(addr: SocketAddr, writer: OwnedWriteHalf, cipher: SessionCipher) -> Self {
        Self {
            id: next_session_id(),
            addr,
            writer: Mutex::new(writer),
            cipher,
            user_id: RwLock::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The authenticated user, once `user` has succeeded.
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.read().is_some()
    }

    /// Bind this connection to a verified identity.
    pub fn bind_user(&self, user_id: &str) {
        debug!(session = self.id, user = user_id, "session authenticated");
        *self.user_id.write() = Some(user_id.to_string());
    }

    /// Send one reply or event frame: `prefix ‖ body`, sealed, framed.
    pub async fn send(&self, prefix: &str, body: &[u8]) -> Result<()> {
        let mut plain = Vec::with_capacity(prefix.len() + body.len());
        plain.extend_from_slice(prefix.as_bytes());
        plain.extend_from_slice(body);
        let sealed = self.cipher.seal(&plain)?;

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &sealed).await?;
        Ok(())
    }

    /// Decrypt one inbound frame body.
    pub fn open(&self, body: &[u8]) -> Result<Vec<u8>> {
        Ok(self.cipher.open(body)?)
    }
}
