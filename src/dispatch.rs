// src/dispatch.rs
// Command registry and the per-session read loop

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, warn};

use crate::error::Result;
use crate::handlers;
use crate::server::AppContext;
use crate::session::Session;
use crate::wire::{WireError, read_frame};

/// One business operation behind a four-byte command code.
///
/// Returning `Ok(true)` keeps the session's read loop running; `Ok(false)`
/// ends it. Validation failures reply with their error token and return
/// `Ok(true)` - only transport failures tear a session down.
#[async_trait]
pub trait Handler: Send + Sync {
    fn code(&self) -> &'static str;

    /// Whether the session must have completed `user` authentication.
    fn requires_auth(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &AppContext, session: &Arc<Session>, payload: &str)
    -> Result<bool>;
}

pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: handlers::registry(),
        }
    }

    /// Route one decoded request. Unknown codes answer `what` on the empty
    /// prefix; unauthenticated sessions get `fail` on the code's channel.
    pub async fn dispatch(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        code: &str,
        payload: &str,
    ) -> Result<bool> {
        let Some(handler) = self.handlers.get(code) else {
            debug!(session = session.id(), code, "unknown command");
            session.send("", b"what").await?;
            return Ok(true);
        };

        if handler.requires_auth() && !session.is_authenticated() {
            session.send(handler.code(), b"fail").await?;
            return Ok(true);
        }

        handler.handle(ctx, session, payload).await
    }

    /// Drive one session until EOF, a fatal error, or a handler ends it.
    pub async fn read_loop(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        mut reader: OwnedReadHalf,
    ) -> Result<()> {
        loop {
            let sealed = match read_frame(&mut reader).await {
                Ok(frame) => frame,
                Err(WireError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let plain = session.open(&sealed)?;

            let Ok(text) = String::from_utf8(plain) else {
                warn!(session = session.id(), "non-UTF-8 request payload");
                return Ok(());
            };
            if text.is_empty() {
                return Ok(());
            }

            let code = match text.get(..4) {
                Some(code) => code.to_ascii_lowercase(),
                None => String::new(),
            };
            let payload = text.get(4..).unwrap_or("");
            debug!(session = session.id(), code = %code, "request received");

            match self.dispatch(ctx, session, &code, payload).await {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
