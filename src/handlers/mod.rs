// src/handlers/mod.rs
// Command handlers and the helpers they share

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::dispatch::Handler;
use crate::error::Result;
use crate::model::{
    AssertionContent, AssertionMessageView, ChatSummary, PredictionView, wire_datetime,
    wire_timestamp,
};
use crate::server::AppContext;
use crate::session::Session;
use crate::store::AssertionRow;
use crate::tokens;

mod assertions;
mod auth;
mod chats;
mod invites;
mod messages;
mod ping;

/// Every handler, keyed by its four-byte command code.
pub fn registry() -> HashMap<&'static str, Arc<dyn Handler>> {
    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(ping::Ping),
        Arc::new(auth::Authenticate),
        Arc::new(chats::ListChats),
        Arc::new(chats::CreateChat),
        Arc::new(chats::ListMembers),
        Arc::new(messages::FetchMessages),
        Arc::new(messages::SendMessage),
        Arc::new(invites::GenerateJoinToken),
        Arc::new(invites::JoinChat),
        Arc::new(assertions::CreateAssertion),
        Arc::new(assertions::CastForecast),
        Arc::new(assertions::CastVote),
    ];
    handlers.into_iter().map(|h| (h.code(), h)).collect()
}

/// Push the `chts` listing to one session, followed by the `tpcs` frame with
/// the push topics. Used by `chts` itself and by the flows that refresh the
/// list after changing it (`user`, `crtc`, `join`).
pub(crate) async fn send_chat_list(ctx: &AppContext, session: &Arc<Session>) -> Result<()> {
    let Some(user_id) = session.user_id() else {
        return Ok(());
    };

    let ids = match ctx.store.user_chat_ids(&user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(user = %user_id, "chat list lookup failed: {e}");
            Vec::new()
        }
    };
    let rows = if ids.is_empty() {
        Vec::new()
    } else {
        match ctx.store.chats_by_ids(&ids).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user = %user_id, "chat listing failed: {e}");
                Vec::new()
            }
        }
    };

    let summaries: Vec<ChatSummary> = rows
        .iter()
        .map(|row| ChatSummary {
            name: row.name.clone(),
            last_message: row.last_message.clone(),
            chat_id: row.id.to_string(),
        })
        .collect();
    session.send("chts", &serde_json::to_vec(&summaries)?).await?;

    if let Some(secret) = &ctx.join_secret {
        if !rows.is_empty() {
            let topics: Vec<String> = rows
                .iter()
                .map(|row| tokens::chat_topic(&row.id.to_string(), secret))
                .collect();
            session.send("tpcs", &serde_json::to_vec(&topics)?).await?;
        }
    }
    Ok(())
}

/// Build the assertion payload carried by `assr` events and resolved
/// messages. `viewer` controls the `didPredict` flag.
pub(crate) async fn assertion_content(
    ctx: &AppContext,
    row: &AssertionRow,
    viewer: Option<&str>,
) -> AssertionContent {
    let store = ctx.store.as_ref();
    let mut predictions = Vec::with_capacity(row.predictions.len());
    for (user_id, prediction) in &row.predictions {
        let profile = ctx.profiles.get(store, user_id).await;
        predictions.push(PredictionView {
            display_name: profile.display_name,
            photo_url: profile.photo_url,
            confidence: prediction.confidence,
            forecast: prediction.forecast,
        });
    }

    AssertionContent {
        id: row.id.to_string(),
        chat_id: row.chat_id.to_string(),
        text: row.text.clone(),
        validation_date: wire_datetime(row.validation_date),
        casting_forecast_deadline: wire_datetime(row.casting_deadline),
        completed: row.completed,
        final_answer: row.final_answer,
        predictions,
        did_predict: viewer.is_some_and(|v| row.predictions.contains_key(v)),
    }
}

/// The same payload wrapped as a message-list entry, author enriched.
pub(crate) async fn assertion_view(
    ctx: &AppContext,
    row: &AssertionRow,
    viewer: Option<&str>,
) -> AssertionMessageView {
    let author = ctx.profiles.get(ctx.store.as_ref(), &row.author).await;
    let content = assertion_content(ctx, row, viewer).await;
    AssertionMessageView::new(author, wire_timestamp(row.created_at), content)
}

/// Spawn a best-effort push to a chat's topic without holding up the handler.
pub(crate) fn spawn_push(ctx: &AppContext, chat_id: i64, title: String, body: String, image: String) {
    let Some(secret) = &ctx.join_secret else {
        return;
    };
    let topic = tokens::chat_topic(&chat_id.to_string(), secret);
    let push = ctx.push.clone();
    tokio::spawn(async move {
        push.notify(&topic, &title, &body, &image).await;
    });
}
