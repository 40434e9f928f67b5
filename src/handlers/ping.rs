// src/handlers/ping.rs

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::Handler;
use crate::error::Result;
use crate::server::AppContext;
use crate::session::Session;

/// Liveness probe; available before authentication.
pub struct Ping;

#[async_trait]
impl Handler for Ping {
    fn code(&self) -> &'static str {
        "ping"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        _ctx: &AppContext,
        session: &Arc<Session>,
        _payload: &str,
    ) -> Result<bool> {
        session.send("ping", b"pong").await?;
        Ok(true)
    }
}
