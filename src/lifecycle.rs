// src/lifecycle.rs
// Assertion completion by vote majority, and forecast scoring

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::Prediction;
use crate::store::{AssertionRow, Store};

const SCORE_MULTIPLIER: f64 = 1000.0;

/// Score one forecast against the settled answer. A confident correct
/// forecast earns up to 1000, a confident wrong one down to 0; sitting on
/// the fence earns the 500 baseline either way. Truncation toward zero,
/// not floor.
pub fn score_prediction(prediction: &Prediction, final_answer: bool) -> i64 {
    let is_correct = prediction.forecast == final_answer;
    let sign = if is_correct { 1.0 } else { -1.0 };
    let delta = (0.5 - prediction.confidence).abs() * SCORE_MULTIPLIER * sign
        + SCORE_MULTIPLIER / 2.0;
    delta as i64
}

/// Derived per-chat rating: mean score per settled forecast, 500 before the
/// first one. Integer division, truncation toward zero.
pub fn elo(score_sum: i64, predictions: i64) -> i64 {
    if predictions > 0 { score_sum / predictions } else { 500 }
}

/// The majority answer, if either side has reached `ceil(members / 2)`.
fn majority(votes: impl Iterator<Item = bool>, member_count: usize) -> Option<bool> {
    let threshold = member_count.div_ceil(2);
    let (mut yes, mut no) = (0usize, 0usize);
    for vote in votes {
        if vote {
            yes += 1;
        } else {
            no += 1;
        }
    }
    if yes >= threshold {
        Some(true)
    } else if no >= threshold {
        Some(false)
    } else {
        None
    }
}

/// Lazily settle an assertion read past its validation date. When a vote
/// majority exists, scores every forecast into the chat stats, marks the
/// assertion completed, and returns the updated row; otherwise returns the
/// row untouched to be re-evaluated on the next read.
///
/// Callers hold the chat lock for the read-modify-write on the stats maps.
pub async fn check_and_complete(
    store: &dyn Store,
    mut assertion: AssertionRow,
    now: DateTime<Utc>,
) -> Result<AssertionRow> {
    if assertion.completed {
        return Ok(assertion);
    }
    if now < assertion.validation_date.and_utc() {
        return Ok(assertion);
    }

    let members = store.chat_members(assertion.chat_id).await?;
    let Some(final_answer) = majority(assertion.votes.values().copied(), members.len()) else {
        debug!(assertion = assertion.id, "no vote majority yet");
        return Ok(assertion);
    };

    let mut stats = store.chat_stats(assertion.chat_id).await?;
    for (user_id, prediction) in &assertion.predictions {
        let delta = score_prediction(prediction, final_answer);
        *stats.score_sum.entry(user_id.clone()).or_insert(0) += delta;
        *stats.predictions.entry(user_id.clone()).or_insert(0) += 1;
    }
    store.update_chat_stats(assertion.chat_id, &stats).await?;
    store
        .complete_assertion(assertion.id, final_answer)
        .await?;

    info!(
        assertion = assertion.id,
        chat = assertion.chat_id,
        final_answer,
        forecasts = assertion.predictions.len(),
        "assertion settled"
    );

    assertion.completed = true;
    assertion.final_answer = final_answer;
    Ok(assertion)
}
