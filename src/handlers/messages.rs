// src/handlers/messages.rs
// `msgs`, `sndm`: message history and sending

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::dispatch::Handler;
use crate::error::Result;
use crate::events::Event;
use crate::lifecycle;
use crate::model::{MessageEntry, MessageView, TextMessageView};
use crate::server::AppContext;
use crate::session::Session;

use super::{assertion_view, spawn_push};

/// How much history one `msgs` request returns.
const HISTORY_LIMIT: usize = 500;

/// `msgs`: the last messages of a chat, senders enriched to profiles and
/// assertion references resolved to full payloads. Resolving an assertion
/// runs it through the lazy completion check.
pub struct FetchMessages;

#[async_trait]
impl Handler for FetchMessages {
    fn code(&self) -> &'static str {
        "msgs"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("msgs", b"fail").await?;
            return Ok(true);
        };
        let Ok(chat_id) = payload.trim().parse::<i64>() else {
            session.send("msgs", b"invalid_chat_id").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("msgs", b"not_member").await?;
            return Ok(true);
        }

        let messages = ctx.store.chat_messages(chat_id).await.unwrap_or_default();
        let start = messages.len().saturating_sub(HISTORY_LIMIT);
        let now = Utc::now();

        let mut views = Vec::with_capacity(messages.len() - start);
        for entry in &messages[start..] {
            match entry {
                MessageEntry::Text {
                    sender,
                    timestamp,
                    content,
                } => {
                    let profile = ctx.profiles.get(ctx.store.as_ref(), sender).await;
                    views.push(MessageView::Text(TextMessageView {
                        sender: profile,
                        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                        content: content.clone(),
                    }));
                }
                MessageEntry::Assertion { assertion_id } => {
                    let row = match ctx.store.assertion(*assertion_id).await {
                        Ok(Some(row)) => row,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(assertion = assertion_id, "assertion lookup failed: {e}");
                            continue;
                        }
                    };
                    let row = match lifecycle::check_and_complete(ctx.store.as_ref(), row, now)
                        .await
                    {
                        Ok(row) => row,
                        Err(e) => {
                            warn!(assertion = assertion_id, "completion check failed: {e}");
                            continue;
                        }
                    };
                    views.push(MessageView::Assertion(
                        assertion_view(ctx, &row, Some(&user_id)).await,
                    ));
                }
            }
        }

        let prefix = format!("msgs{chat_id},");
        session.send(&prefix, &serde_json::to_vec(&views)?).await?;
        Ok(true)
    }
}

/// `sndm`: append a text message, update the chat preview line, fan out
/// `newm` to the other members, and fire a best-effort push.
pub struct SendMessage;

#[async_trait]
impl Handler for SendMessage {
    fn code(&self) -> &'static str {
        "sndm"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("sndm", b"fail").await?;
            return Ok(true);
        };

        let trimmed = payload.trim();
        let (chat_raw, text) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let Ok(chat_id) = chat_raw.parse::<i64>() else {
            session.send("sndm", b"invalid_chat_id").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("sndm", b"not_member").await?;
            return Ok(true);
        }

        let now = Utc::now();
        let profile = ctx.profiles.get(ctx.store.as_ref(), &user_id).await;
        let entry = MessageEntry::Text {
            sender: user_id.clone(),
            timestamp: now,
            content: text.to_string(),
        };
        let preview = format!("{}: {}", profile.display_name, text);

        if let Err(e) = ctx
            .store
            .append_message(chat_id, &entry, Some(&preview))
            .await
        {
            warn!(chat = chat_id, "message append failed: {e}");
            session.send("sndm", b"fail").await?;
            return Ok(true);
        }

        let view = TextMessageView {
            sender: profile.clone(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            content: text.to_string(),
        };
        let mut data = format!("{chat_id},").into_bytes();
        data.extend_from_slice(&serde_json::to_vec(&view)?);
        let recipients = members.into_iter().filter(|m| *m != user_id).collect();
        ctx.events.emit(Event {
            prefix: "newm",
            data,
            recipients,
        });

        spawn_push(
            ctx,
            chat_id,
            profile.display_name,
            text.to_string(),
            profile.photo_url,
        );

        session.send("sndm", b"ok").await?;
        Ok(true)
    }
}
