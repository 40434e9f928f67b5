// src/store/mysql.rs
// MySQL/MariaDB store: whole-column JSON read-modify-write over a pool

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::mysql::MySqlPool;
use sqlx::{QueryBuilder, Row};
use tracing::debug;

use crate::error::Result;
use crate::model::{MessageEntry, Prediction, Profile};

use super::{AssertionRow, ChatStats, ChatSummaryRow, NewAssertion, NewUser, Store};

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Decode a JSON column, tolerating NULL and malformed content the way the
/// column defaults would.
fn decode_column<T: DeserializeOwned + Default>(raw: Option<String>) -> T {
    match raw {
        Some(text) if !text.is_empty() => serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!("malformed JSON column ignored: {e}");
            T::default()
        }),
        _ => T::default(),
    }
}

fn encode_column<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[async_trait]
impl Store for MySqlStore {
    async fn upsert_user(&self, user: NewUser<'_>) -> Result<()> {
        sqlx::query(
            "INSERT INTO Users (UserId, DisplayName, Email, PhotoUrl, Chats) \
             VALUES (?, ?, ?, ?, '[]') \
             ON DUPLICATE KEY UPDATE \
             DisplayName = VALUES(DisplayName), Email = VALUES(Email), PhotoUrl = VALUES(PhotoUrl)",
        )
        .bind(user.user_id)
        .bind(user.display_name)
        .bind(user.email)
        .bind(user.photo_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<Profile> {
        let row = sqlx::query("SELECT DisplayName, PhotoUrl FROM Users WHERE UserId = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => Profile {
                display_name: row.try_get("DisplayName")?,
                photo_url: row.try_get("PhotoUrl")?,
            },
            None => Profile::default(),
        })
    }

    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<i64>> {
        let row = sqlx::query("SELECT Chats FROM Users WHERE UserId = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(decode_column(match row {
            Some(row) => row.try_get("Chats")?,
            None => None,
        }))
    }

    async fn chats_by_ids(&self, ids: &[i64]) -> Result<Vec<ChatSummaryRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder =
            QueryBuilder::<sqlx::MySql>::new("SELECT Id, Name, LastMessage FROM Chats WHERE Id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            chats.push(ChatSummaryRow {
                id: row.try_get("Id")?,
                name: row.try_get("Name")?,
                last_message: row.try_get::<Option<String>, _>("LastMessage")?.unwrap_or_default(),
            });
        }
        // Preserve the order of the user's chat list, not the table's.
        chats.sort_by_key(|chat| ids.iter().position(|id| *id == chat.id));
        Ok(chats)
    }

    async fn create_chat(&self, name: &str, creator: &str) -> Result<i64> {
        let members = encode_column(&vec![creator])?;
        let mut stats = ChatStats::default();
        stats.score_sum.insert(creator.to_string(), 0);
        stats.predictions.insert(creator.to_string(), 0);

        let result = sqlx::query(
            "INSERT INTO Chats (Name, Type, LastMessage, Members, Messages, ScoreSumPerUser, PredictionsPerUser) \
             VALUES (?, 0, '', ?, '[]', ?, ?)",
        )
        .bind(name)
        .bind(members)
        .bind(encode_column(&stats.score_sum)?)
        .bind(encode_column(&stats.predictions)?)
        .execute(&self.pool)
        .await?;
        let chat_id = result.last_insert_id() as i64;

        self.attach_chat_to_user(creator, chat_id).await?;
        Ok(chat_id)
    }

    async fn chat_members(&self, chat_id: i64) -> Result<Vec<String>> {
        let row = sqlx::query("SELECT Members FROM Chats WHERE Id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(decode_column(match row {
            Some(row) => row.try_get("Members")?,
            None => None,
        }))
    }

    async fn add_member(&self, chat_id: i64, user_id: &str) -> Result<()> {
        let mut members = self.chat_members(chat_id).await?;
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
            sqlx::query("UPDATE Chats SET Members = ? WHERE Id = ?")
                .bind(encode_column(&members)?)
                .bind(chat_id)
                .execute(&self.pool)
                .await?;
        }

        let mut stats = self.chat_stats(chat_id).await?;
        stats.score_sum.entry(user_id.to_string()).or_insert(0);
        stats.predictions.entry(user_id.to_string()).or_insert(0);
        self.update_chat_stats(chat_id, &stats).await?;

        self.attach_chat_to_user(user_id, chat_id).await?;
        Ok(())
    }

    async fn chat_messages(&self, chat_id: i64) -> Result<Vec<MessageEntry>> {
        let row = sqlx::query("SELECT Messages FROM Chats WHERE Id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(decode_column(match row {
            Some(row) => row.try_get("Messages")?,
            None => None,
        }))
    }

    async fn append_message(
        &self,
        chat_id: i64,
        entry: &MessageEntry,
        last_message: Option<&str>,
    ) -> Result<()> {
        let mut messages = self.chat_messages(chat_id).await?;
        messages.push(entry.clone());
        let encoded = encode_column(&messages)?;

        match last_message {
            Some(preview) => {
                sqlx::query("UPDATE Chats SET Messages = ?, LastMessage = ? WHERE Id = ?")
                    .bind(encoded)
                    .bind(preview)
                    .bind(chat_id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("UPDATE Chats SET Messages = ? WHERE Id = ?")
                    .bind(encoded)
                    .bind(chat_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn chat_stats(&self, chat_id: i64) -> Result<ChatStats> {
        let row = sqlx::query("SELECT ScoreSumPerUser, PredictionsPerUser FROM Chats WHERE Id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => ChatStats {
                score_sum: decode_column(row.try_get("ScoreSumPerUser")?),
                predictions: decode_column(row.try_get("PredictionsPerUser")?),
            },
            None => ChatStats::default(),
        })
    }

    async fn update_chat_stats(&self, chat_id: i64, stats: &ChatStats) -> Result<()> {
        sqlx::query("UPDATE Chats SET ScoreSumPerUser = ?, PredictionsPerUser = ? WHERE Id = ?")
            .bind(encode_column(&stats.score_sum)?)
            .bind(encode_column(&stats.predictions)?)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_assertion(&self, assertion: NewAssertion<'_>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO Assertions \
             (UserId, ChatId, Text, Predictions, Votes, ValidationDate, CastingForecastDeadline, CreatedAt, Completed, FinalAnswer) \
             VALUES (?, ?, ?, '{}', '{}', ?, ?, ?, 0, 0)",
        )
        .bind(assertion.author)
        .bind(assertion.chat_id)
        .bind(assertion.text)
        .bind(assertion.validation_date)
        .bind(assertion.casting_deadline)
        .bind(assertion.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    async fn assertion(&self, assertion_id: i64) -> Result<Option<AssertionRow>> {
        let row = sqlx::query(
            "SELECT Id, UserId, ChatId, Text, Predictions, Votes, \
             ValidationDate, CastingForecastDeadline, CreatedAt, Completed, FinalAnswer \
             FROM Assertions WHERE Id = ?",
        )
        .bind(assertion_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(AssertionRow {
            id: row.try_get("Id")?,
            author: row.try_get("UserId")?,
            chat_id: row.try_get("ChatId")?,
            text: row.try_get("Text")?,
            predictions: decode_column(row.try_get("Predictions")?),
            votes: decode_column(row.try_get("Votes")?),
            validation_date: row.try_get("ValidationDate")?,
            casting_deadline: row.try_get("CastingForecastDeadline")?,
            created_at: row.try_get("CreatedAt")?,
            completed: row.try_get("Completed")?,
            final_answer: row.try_get("FinalAnswer")?,
        }))
    }

    async fn add_prediction(
        &self,
        assertion_id: i64,
        user_id: &str,
        prediction: Prediction,
    ) -> Result<bool> {
        let Some(row) = self.assertion(assertion_id).await? else {
            return Ok(false);
        };
        let mut predictions = row.predictions;
        if predictions.contains_key(user_id) {
            return Ok(false);
        }
        predictions.insert(user_id.to_string(), prediction);

        sqlx::query("UPDATE Assertions SET Predictions = ? WHERE Id = ?")
            .bind(encode_column(&predictions)?)
            .bind(assertion_id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn set_vote(&self, assertion_id: i64, user_id: &str, vote: bool) -> Result<()> {
        let Some(row) = self.assertion(assertion_id).await? else {
            return Ok(());
        };
        let mut votes = row.votes;
        votes.insert(user_id.to_string(), vote);

        sqlx::query("UPDATE Assertions SET Votes = ? WHERE Id = ?")
            .bind(encode_column(&votes)?)
            .bind(assertion_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_assertion(&self, assertion_id: i64, final_answer: bool) -> Result<()> {
        sqlx::query("UPDATE Assertions SET Completed = 1, FinalAnswer = ? WHERE Id = ?")
            .bind(final_answer)
            .bind(assertion_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl MySqlStore {
    /// Record a chat on the user's side of the membership relation.
    async fn attach_chat_to_user(&self, user_id: &str, chat_id: i64) -> Result<()> {
        let mut chats = self.user_chat_ids(user_id).await?;
        if !chats.contains(&chat_id) {
            chats.push(chat_id);
            sqlx::query("UPDATE Users SET Chats = ? WHERE UserId = ?")
                .bind(encode_column(&chats)?)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}
