// src/handlers/invites.rs
// `cjtk`, `join`: join-token generation and redemption

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatch::Handler;
use crate::error::Result;
use crate::server::AppContext;
use crate::session::Session;
use crate::tokens;

use super::send_chat_list;

/// `cjtk`: hand a member an opaque token that admits one user to the chat.
pub struct GenerateJoinToken;

#[async_trait]
impl Handler for GenerateJoinToken {
    fn code(&self) -> &'static str {
        "cjtk"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("cjtk", b"fail").await?;
            return Ok(true);
        };
        let Ok(chat_id) = payload.trim().parse::<i64>() else {
            session.send("cjtk", b"invalid_chat_id").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("cjtk", b"not_member").await?;
            return Ok(true);
        }

        let Some(secret) = &ctx.join_secret else {
            session.send("cjtk", b"secret_fail").await?;
            return Ok(true);
        };

        let token = tokens::join_token(&chat_id.to_string(), secret);
        session.send("cjtk", token.as_bytes()).await?;
        Ok(true)
    }
}

/// `join`: redeem a token. The hash is re-derived from the chat id and the
/// shared secret and compared bytewise; membership lands on both sides of
/// the relation under the chat lock.
pub struct JoinChat;

#[async_trait]
impl Handler for JoinChat {
    fn code(&self) -> &'static str {
        "join"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("join", b"fail").await?;
            return Ok(true);
        };

        let Some((presented_hash, chat_raw)) = tokens::parse_join_token(payload.trim()) else {
            session.send("join", b"invalid_token").await?;
            return Ok(true);
        };
        let Some(secret) = &ctx.join_secret else {
            session.send("join", b"secret_fail").await?;
            return Ok(true);
        };
        if presented_hash != tokens::join_token_hash(&chat_raw, secret) {
            session.send("join", b"invalid_token").await?;
            return Ok(true);
        }
        let Ok(chat_id) = chat_raw.parse::<i64>() else {
            session.send("join", b"invalid_token").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if members.iter().any(|m| *m == user_id) {
            session.send("join", b"already_member").await?;
            return Ok(true);
        }
        // A verified hash can still name a chat that no longer exists.
        if members.is_empty() {
            session.send("join", b"add_failed").await?;
            return Ok(true);
        }

        if let Err(e) = ctx.store.add_member(chat_id, &user_id).await {
            warn!(chat = chat_id, user = %user_id, "join failed: {e}");
            session.send("join", b"add_failed").await?;
            return Ok(true);
        }
        info!(chat = chat_id, user = %user_id, "member joined");

        session.send("join", b"joined").await?;
        send_chat_list(ctx, session).await?;
        Ok(true)
    }
}
