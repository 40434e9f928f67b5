// src/server.rs
// Listener loop and per-connection setup

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::events::EventEngine;
use crate::identity::IdentityVerifier;
use crate::locks::ChatLocks;
use crate::profile::ProfileCache;
use crate::push::PushNotifier;
use crate::session::Session;
use crate::store::Store;
use crate::wire;

/// Everything handlers share: the persistence seam, the external
/// collaborators, the fan-out engine, and the per-chat locks.
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub push: Arc<dyn PushNotifier>,
    pub events: Arc<EventEngine>,
    pub locks: ChatLocks,
    pub profiles: ProfileCache,
    /// CJTK_SECRET; join tokens and push topics need it.
    pub join_secret: Option<String>,
}

/// Accept connections forever, one task per session.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new());
    info!(addr = %listener.local_addr()?, "server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            handle_connection(ctx, dispatcher, stream).await;
        });
    }
}

async fn handle_connection(ctx: Arc<AppContext>, dispatcher: Arc<Dispatcher>, mut stream: TcpStream) {
    let addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!("peer address unavailable: {e}");
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%addr, "failed to set TCP_NODELAY: {e}");
    }
    info!(%addr, "connection established");

    // Handshake failures close the socket without a reply.
    let cipher = match wire::establish(&mut stream).await {
        Ok(cipher) => cipher,
        Err(e) => {
            debug!(%addr, "handshake failed: {e}");
            return;
        }
    };
    debug!(%addr, key_bits = cipher.key_bits(), "session key established");

    let (read_half, write_half) = stream.into_split();
    let session = Arc::new(Session::new(addr, write_half, cipher));

    if let Err(e) = dispatcher.read_loop(&ctx, &session, read_half).await {
        warn!(%addr, "session terminated: {e}");
    }

    if let Some(user_id) = session.user_id() {
        ctx.events.unregister(&user_id, session.id());
    }
    info!(%addr, "connection closed");
}
