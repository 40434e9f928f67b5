// tests/test_utils.rs
// Shared harness: an in-process server and a protocol-complete test client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use augury::events::EventEngine;
use augury::identity::{IdentityClaims, StaticIdentityVerifier};
use augury::locks::ChatLocks;
use augury::profile::ProfileCache;
use augury::push::NoopNotifier;
use augury::server::{self, AppContext};
use augury::store::MemoryStore;
use augury::wire::{NONCE_LEN, SessionCipher, read_frame, write_frame};

pub const TEST_SECRET: &str = "test-secret";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
}

/// Spin up a full server on an ephemeral port with the in-memory store, a
/// static token table (token-alice/bob/carol), and no push gateway.
pub async fn spawn_server() -> TestServer {
    let store = Arc::new(MemoryStore::new());

    let identity = StaticIdentityVerifier::new();
    for (token, subject, name) in [
        ("token-alice", "uid-alice", "Alice"),
        ("token-bob", "uid-bob", "Bob"),
        ("token-carol", "uid-carol", "Carol"),
    ] {
        identity.insert(
            token,
            IdentityClaims {
                subject: subject.to_string(),
                display_name: name.to_string(),
                email: format!("{name}@example.com").to_lowercase(),
                photo_url: String::new(),
            },
        );
    }

    let (events, worker) = EventEngine::new();
    tokio::spawn(worker.run());

    let ctx = Arc::new(AppContext {
        store: store.clone(),
        identity: Arc::new(identity),
        push: Arc::new(NoopNotifier),
        events,
        locks: ChatLocks::new(),
        profiles: ProfileCache::new(),
        join_secret: Some(TEST_SECRET.to_string()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server::serve(listener, ctx).await;
    });

    TestServer { addr, store }
}

/// A client speaking the real wire protocol, handshake included.
pub struct TestClient {
    stream: TcpStream,
    cipher: SessionCipher,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let pem_body = read_frame(&mut stream).await.unwrap();
        let pem = String::from_utf8(pem_body).unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(&pem).unwrap();

        let mut session_key = [0u8; 32];
        OsRng.fill_bytes(&mut session_key);
        let wrapped = public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &session_key)
            .unwrap();
        write_frame(&mut stream, &wrapped).await.unwrap();

        // The nonce announcement arrives raw, not as an encrypted frame.
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(u32::from_be_bytes(header) as usize, NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        stream.read_exact(&mut nonce).await.unwrap();

        Self {
            stream,
            cipher: SessionCipher::new(&session_key).unwrap(),
        }
    }

    /// Send one request: `code ‖ payload` as a sealed frame.
    pub async fn send(&mut self, request: &str) {
        let sealed = self.cipher.seal(request.as_bytes()).unwrap();
        write_frame(&mut self.stream, &sealed).await.unwrap();
    }

    /// Receive and decrypt one frame.
    pub async fn recv(&mut self) -> Vec<u8> {
        let sealed = timeout(RECV_TIMEOUT, read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for a frame")
            .unwrap();
        self.cipher.open(&sealed).unwrap()
    }

    pub async fn recv_text(&mut self) -> String {
        String::from_utf8(self.recv().await).unwrap()
    }

    /// Read frames until one starts with the given prefix, discarding
    /// interleaved event frames the test does not assert on.
    pub async fn recv_with_prefix(&mut self, prefix: &str) -> String {
        for _ in 0..16 {
            let text = self.recv_text().await;
            if text.starts_with(prefix) {
                return text;
            }
        }
        panic!("no frame with prefix {prefix:?} within 16 frames");
    }

    /// Receive two frames whose relative order is not guaranteed (a reply
    /// and an event) and return them as (a, b) by their prefixes. Frames
    /// matching neither prefix are discarded.
    pub async fn recv_pair(&mut self, prefix_a: &str, prefix_b: &str) -> (String, String) {
        let mut a = None;
        let mut b = None;
        for _ in 0..16 {
            let text = self.recv_text().await;
            if a.is_none() && text.starts_with(prefix_a) {
                a = Some(text);
            } else if b.is_none() && text.starts_with(prefix_b) {
                b = Some(text);
            }
            if let (Some(a), Some(b)) = (&a, &b) {
                return (a.clone(), b.clone());
            }
        }
        panic!("no frames with prefixes {prefix_a:?} and {prefix_b:?} within 16 frames");
    }

    /// Authenticate and drain the listing frames the server pushes after it.
    /// Returns the display name from the `token_ok` reply.
    pub async fn authenticate(&mut self, token: &str) -> String {
        self.send(&format!("user{token}")).await;
        let reply = self.recv_text().await;
        let display_name = reply
            .strip_prefix("token_ok")
            .unwrap_or_else(|| panic!("authentication failed: {reply:?}"))
            .to_string();

        let chats = self.recv_text().await;
        let listing = chats.strip_prefix("chts").expect("expected chts frame");
        if listing != "[]" {
            let topics = self.recv_text().await;
            assert!(topics.starts_with("tpcs"), "expected tpcs frame");
        }
        display_name
    }

    /// Drain the `chts` (and, for a non-empty list, `tpcs`) refresh frames
    /// that follow `crtc` and `join` replies.
    pub async fn drain_chat_list(&mut self) {
        let chats = self.recv_with_prefix("chts").await;
        if &chats["chts".len()..] != "[]" {
            self.recv_with_prefix("tpcs").await;
        }
    }
}
