// src/handlers/assertions.rs
// `assr`, `pred`, `vote`: the assertion lifecycle as seen from the wire

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::dispatch::Handler;
use crate::error::Result;
use crate::events::Event;
use crate::lifecycle;
use crate::model::{MessageEntry, Prediction, parse_client_datetime};
use crate::server::AppContext;
use crate::session::Session;
use crate::store::NewAssertion;

use super::{assertion_content, assertion_view, spawn_push};

/// `assr` payload: `"{chatId},{validationDate},{castingForecastDeadline},{text}"`.
/// Creates the assertion, appends its reference to the chat log, and shows
/// the new assertion to every member including the author.
pub struct CreateAssertion;

#[async_trait]
impl Handler for CreateAssertion {
    fn code(&self) -> &'static str {
        "assr"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("assr", b"fail").await?;
            return Ok(true);
        };

        let parts: Vec<&str> = payload.trim().splitn(4, ',').collect();
        if parts.len() != 4 {
            session.send("assr", b"invalid_format").await?;
            return Ok(true);
        }
        let (chat_raw, validation_raw, casting_raw, text) =
            (parts[0], parts[1], parts[2], parts[3]);
        if chat_raw.is_empty() || validation_raw.is_empty() || casting_raw.is_empty()
            || text.is_empty()
        {
            session.send("assr", b"missing_fields").await?;
            return Ok(true);
        }
        let Ok(chat_id) = chat_raw.parse::<i64>() else {
            session.send("assr", b"invalid_chat_id").await?;
            return Ok(true);
        };

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("assr", b"not_member").await?;
            return Ok(true);
        }

        let (Some(validation), Some(casting)) = (
            parse_client_datetime(validation_raw),
            parse_client_datetime(casting_raw),
        ) else {
            session.send("assr", b"invalid_format").await?;
            return Ok(true);
        };
        let now = Utc::now();
        if casting <= now {
            session.send("assr", b"casting_deadline_past").await?;
            return Ok(true);
        }
        if validation <= casting {
            session.send("assr", b"validation_before_casting").await?;
            return Ok(true);
        }

        let assertion_id = match ctx
            .store
            .create_assertion(NewAssertion {
                author: &user_id,
                chat_id,
                text,
                validation_date: validation.naive_utc(),
                casting_deadline: casting.naive_utc(),
                created_at: now.naive_utc(),
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(chat = chat_id, "assertion creation failed: {e}");
                session.send("assr", b"create_failed").await?;
                return Ok(true);
            }
        };

        let entry = MessageEntry::Assertion { assertion_id };
        if let Err(e) = ctx.store.append_message(chat_id, &entry, None).await {
            warn!(chat = chat_id, assertion = assertion_id, "reference append failed: {e}");
            session.send("assr", b"message_failed").await?;
            return Ok(true);
        }
        info!(chat = chat_id, assertion = assertion_id, author = %user_id, "assertion created");

        // Author-visible fan-out: the sender sees their own assertion too.
        match ctx.store.assertion(assertion_id).await {
            Ok(Some(row)) => {
                let view = assertion_view(ctx, &row, Some(&user_id)).await;
                let mut data = format!("{chat_id},").into_bytes();
                data.extend_from_slice(&serde_json::to_vec(&view)?);
                ctx.events.emit(Event {
                    prefix: "newm",
                    data,
                    recipients: members,
                });

                let author = ctx.profiles.get(ctx.store.as_ref(), &user_id).await;
                spawn_push(ctx, chat_id, author.display_name, text.to_string(), author.photo_url);
            }
            Ok(None) => warn!(assertion = assertion_id, "created assertion not readable"),
            Err(e) => warn!(assertion = assertion_id, "created assertion not readable: {e}"),
        }

        session
            .send("assr", format!("created:{assertion_id}").as_bytes())
            .await?;
        Ok(true)
    }
}

/// `pred` payload: `"{assertionId},{confidence},{forecast}"`. One forecast
/// per member per assertion, before the casting deadline.
pub struct CastForecast;

#[async_trait]
impl Handler for CastForecast {
    fn code(&self) -> &'static str {
        "pred"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("pred", b"fail").await?;
            return Ok(true);
        };

        let parts: Vec<&str> = payload.trim().splitn(3, ',').collect();
        if parts.len() != 3 {
            session.send("pred", b"invalid_format").await?;
            return Ok(true);
        }
        let (assertion_raw, confidence_raw, forecast_raw) = (parts[0], parts[1], parts[2]);
        if assertion_raw.is_empty() {
            session.send("pred", b"missing_fields").await?;
            return Ok(true);
        }
        let Ok(assertion_id) = assertion_raw.parse::<i64>() else {
            session.send("pred", b"assertion_not_found").await?;
            return Ok(true);
        };

        // First fetch only locates the chat; state is re-read under its lock.
        let Ok(Some(located)) = ctx.store.assertion(assertion_id).await else {
            session.send("pred", b"assertion_not_found").await?;
            return Ok(true);
        };
        let chat_id = located.chat_id;

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("pred", b"not_member").await?;
            return Ok(true);
        }

        let Ok(Some(row)) = ctx.store.assertion(assertion_id).await else {
            session.send("pred", b"assertion_not_found").await?;
            return Ok(true);
        };
        if row.completed {
            session.send("pred", b"assertion_complete").await?;
            return Ok(true);
        }
        let now = Utc::now();
        if now >= row.casting_deadline.and_utc() {
            session.send("pred", b"casting_deadline_passed").await?;
            return Ok(true);
        }

        let confidence = match confidence_raw.parse::<f64>() {
            Ok(c) if (0.0..=1.0).contains(&c) => c,
            _ => {
                session.send("pred", b"invalid_confidence").await?;
                return Ok(true);
            }
        };
        let forecast = match forecast_raw {
            "true" => true,
            "false" => false,
            _ => {
                session.send("pred", b"invalid_forecast").await?;
                return Ok(true);
            }
        };

        let prediction = Prediction {
            confidence,
            forecast,
        };
        match ctx.store.add_prediction(assertion_id, &user_id, prediction).await {
            Ok(true) => {}
            Ok(false) => {
                session.send("pred", b"add_failed").await?;
                return Ok(true);
            }
            Err(e) => {
                warn!(assertion = assertion_id, "forecast write failed: {e}");
                session.send("pred", b"add_failed").await?;
                return Ok(true);
            }
        }

        let mut updated = row;
        updated.predictions.insert(user_id.clone(), prediction);

        // Other members get the refreshed state; only the caller sees their
        // own forecast flagged.
        let content = assertion_content(ctx, &updated, None).await;
        let others = members.into_iter().filter(|m| *m != user_id).collect();
        ctx.events.emit(Event {
            prefix: "assr",
            data: serde_json::to_vec(&content)?,
            recipients: others,
        });

        let mut own = content;
        own.did_predict = true;
        ctx.events.emit(Event {
            prefix: "assr",
            data: serde_json::to_vec(&own)?,
            recipients: vec![user_id],
        });

        session.send("pred", b"added").await?;
        Ok(true)
    }
}

/// `vote` payload: `"{assertionId},{true|false}"`. Open after the validation
/// date; the refetch may settle the assertion, and every member sees the
/// refreshed state.
pub struct CastVote;

#[async_trait]
impl Handler for CastVote {
    fn code(&self) -> &'static str {
        "vote"
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let Some(user_id) = session.user_id() else {
            session.send("vote", b"fail").await?;
            return Ok(true);
        };

        let Some((assertion_raw, vote_raw)) = payload.trim().split_once(',') else {
            session.send("vote", b"invalid_format").await?;
            return Ok(true);
        };
        let vote = match vote_raw {
            "true" => true,
            "false" => false,
            _ => {
                session.send("vote", b"invalid_forecast").await?;
                return Ok(true);
            }
        };
        let Ok(assertion_id) = assertion_raw.parse::<i64>() else {
            session.send("vote", b"assertion_not_found").await?;
            return Ok(true);
        };

        let Ok(Some(located)) = ctx.store.assertion(assertion_id).await else {
            session.send("vote", b"assertion_not_found").await?;
            return Ok(true);
        };
        let chat_id = located.chat_id;

        let lock = ctx.locks.chat(chat_id);
        let _guard = lock.lock().await;

        let members = ctx.store.chat_members(chat_id).await.unwrap_or_default();
        if !members.iter().any(|m| *m == user_id) {
            session.send("vote", b"not_member").await?;
            return Ok(true);
        }

        let Ok(Some(row)) = ctx.store.assertion(assertion_id).await else {
            session.send("vote", b"assertion_not_found").await?;
            return Ok(true);
        };
        if row.completed {
            session.send("vote", b"assertion_complete").await?;
            return Ok(true);
        }
        let now = Utc::now();
        if now < row.validation_date.and_utc() {
            session.send("vote", b"voting_not_open").await?;
            return Ok(true);
        }

        if let Err(e) = ctx.store.set_vote(assertion_id, &user_id, vote).await {
            warn!(assertion = assertion_id, "vote write failed: {e}");
            session.send("vote", b"vote_failed").await?;
            return Ok(true);
        }

        let mut voted = row;
        voted.votes.insert(user_id.clone(), vote);

        // The new vote may be the one that settles the assertion.
        let settled = match lifecycle::check_and_complete(ctx.store.as_ref(), voted.clone(), now)
            .await
        {
            Ok(settled) => settled,
            Err(e) => {
                warn!(assertion = assertion_id, "completion check failed: {e}");
                voted
            }
        };

        let content = assertion_content(ctx, &settled, None).await;
        ctx.events.emit(Event {
            prefix: "assr",
            data: serde_json::to_vec(&content)?,
            recipients: members,
        });

        session.send("vote", b"voted").await?;
        Ok(true)
    }
}
