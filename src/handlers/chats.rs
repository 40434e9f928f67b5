// src/handlers/chats.rs
// `chts`, `crtc`, `memb`: chat listing, creation, and member scoreboard

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::dispatch::Handler;
use crate::error::Result;
use crate::lifecycle;
use crate::model::MemberView;
use crate::server::AppContext;
use crate::session::Session;

use super::send_chat_list;

/// `chts`: the caller's chats plus the matching `tpcs` topic frame.
pub struct ListChats;

#[async_trait]
impl Handler for ListChats {
    fn code(&self) -> &'static str {
        "chts"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        _payload: &str,
    ) -> Result<bool> {
        send_chat_list(ctx, session).await?;
        Ok(true)
    }
}

/// `crtc`: create a chat with the caller as sole member and zeroed stats.
pub struct CreateChat;

#[async_trait]
impl Handler for CreateChat {
    fn code(&self) -> &'static str {
        "crtc"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("crtc", b"fail").await?;
            return Ok(true);
        };

        let name = payload.trim();
        if name.is_empty() {
            session.send("crtc", b"invalid_name").await?;
            return Ok(true);
        }

        let chat_id = match ctx.store.create_chat(name, &user_id).await {
            Ok(chat_id) => chat_id,
            Err(e) => {
                warn!(user = %user_id, "chat creation failed: {e}");
                session.send("crtc", b"create_failed").await?;
                return Ok(true);
            }
        };

        session
            .send("crtc", format!("created:{chat_id}").as_bytes())
            .await?;
        send_chat_list(ctx, session).await?;
        Ok(true)
    }
}

/// `memb`: chat members with their per-chat ELO, best first.
pub struct ListMembers;

#[async_trait]
impl Handler for ListMembers {
    fn code(&self) -> &'static str {
        "memb"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Ok(chat_id) = payload.trim().parse::<i64>() else {
            session.send("memb", b"invalid_chat_id").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if members.is_empty() {
            session.send("memb", b"no_members").await?;
            return Ok(true);
        }
        let stats = ctx.store.chat_stats(chat_id).await.unwrap_or_default();

        let mut views = Vec::with_capacity(members.len());
        for member in &members {
            let profile = ctx.profiles.get(ctx.store.as_ref(), member).await;
            let display_name = if profile.display_name.is_empty() {
                member.clone()
            } else {
                profile.display_name
            };
            let score = stats.score_sum.get(member).copied().unwrap_or(0);
            let count = stats.predictions.get(member).copied().unwrap_or(0);
            views.push(MemberView {
                display_name,
                photo_url: profile.photo_url,
                elo: lifecycle::elo(score, count),
            });
        }
        views.sort_by(|a, b| b.elo.cmp(&a.elo));

        let mut body = format!("{chat_id},").into_bytes();
        body.extend_from_slice(&serde_json::to_vec(&views)?);
        session.send("memb", &body).await?;
        Ok(true)
    }
}
