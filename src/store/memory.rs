// src/store/memory.rs
// In-memory store implementation backing the test suite

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{MessageEntry, Prediction, Profile};

use super::{AssertionRow, ChatStats, ChatSummaryRow, NewAssertion, NewUser, Store};

#[derive(Debug, Clone, Default)]
struct UserRecord {
    profile: Profile,
    email: String,
    chats: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
struct ChatRecord {
    name: String,
    last_message: String,
    members: Vec<String>,
    messages: Vec<MessageEntry>,
    stats: ChatStats,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    chats: HashMap<i64, ChatRecord>,
    assertions: HashMap<i64, AssertionRow>,
    next_chat_id: i64,
    next_assertion_id: i64,
}

/// Hash-map backed store with the same semantics as the MySQL adapter.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, user: NewUser<'_>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner.users.entry(user.user_id.to_string()).or_default();
        record.profile = Profile {
            display_name: user.display_name.to_string(),
            photo_url: user.photo_url.to_string(),
        };
        record.email = user.email.to_string();
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<Profile> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(user_id)
            .map(|u| u.profile.clone())
            .unwrap_or_default())
    }

    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(user_id)
            .map(|u| u.chats.clone())
            .unwrap_or_default())
    }

    async fn chats_by_ids(&self, ids: &[i64]) -> Result<Vec<ChatSummaryRow>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                inner.chats.get(id).map(|chat| ChatSummaryRow {
                    id: *id,
                    name: chat.name.clone(),
                    last_message: chat.last_message.clone(),
                })
            })
            .collect())
    }

    async fn create_chat(&self, name: &str, creator: &str) -> Result<i64> {
        let mut inner = self.inner.write().await;
        inner.next_chat_id += 1;
        let chat_id = inner.next_chat_id;

        let mut stats = ChatStats::default();
        stats.score_sum.insert(creator.to_string(), 0);
        stats.predictions.insert(creator.to_string(), 0);

        inner.chats.insert(
            chat_id,
            ChatRecord {
                name: name.to_string(),
                last_message: String::new(),
                members: vec![creator.to_string()],
                messages: Vec::new(),
                stats,
            },
        );

        let user = inner.users.entry(creator.to_string()).or_default();
        if !user.chats.contains(&chat_id) {
            user.chats.push(chat_id);
        }
        Ok(chat_id)
    }

    async fn chat_members(&self, chat_id: i64) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .get(&chat_id)
            .map(|c| c.members.clone())
            .unwrap_or_default())
    }

    async fn add_member(&self, chat_id: i64, user_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            if !chat.members.iter().any(|m| m == user_id) {
                chat.members.push(user_id.to_string());
            }
            chat.stats.score_sum.entry(user_id.to_string()).or_insert(0);
            chat.stats
                .predictions
                .entry(user_id.to_string())
                .or_insert(0);
        }
        let user = inner.users.entry(user_id.to_string()).or_default();
        if !user.chats.contains(&chat_id) {
            user.chats.push(chat_id);
        }
        Ok(())
    }

    async fn chat_messages(&self, chat_id: i64) -> Result<Vec<MessageEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .get(&chat_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default())
    }

    async fn append_message(
        &self,
        chat_id: i64,
        entry: &MessageEntry,
        last_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            chat.messages.push(entry.clone());
            if let Some(preview) = last_message {
                chat.last_message = preview.to_string();
            }
        }
        Ok(())
    }

    async fn chat_stats(&self, chat_id: i64) -> Result<ChatStats> {
        let inner = self.inner.read().await;
        Ok(inner
            .chats
            .get(&chat_id)
            .map(|c| c.stats.clone())
            .unwrap_or_default())
    }

    async fn update_chat_stats(&self, chat_id: i64, stats: &ChatStats) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(chat) = inner.chats.get_mut(&chat_id) {
            chat.stats = stats.clone();
        }
        Ok(())
    }

    async fn create_assertion(&self, assertion: NewAssertion<'_>) -> Result<i64> {
        let mut inner = self.inner.write().await;
        inner.next_assertion_id += 1;
        let id = inner.next_assertion_id;
        inner.assertions.insert(
            id,
            AssertionRow {
                id,
                author: assertion.author.to_string(),
                chat_id: assertion.chat_id,
                text: assertion.text.to_string(),
                predictions: Default::default(),
                votes: Default::default(),
                validation_date: assertion.validation_date,
                casting_deadline: assertion.casting_deadline,
                created_at: assertion.created_at,
                completed: false,
                final_answer: false,
            },
        );
        Ok(id)
    }

    async fn assertion(&self, assertion_id: i64) -> Result<Option<AssertionRow>> {
        let inner = self.inner.read().await;
        Ok(inner.assertions.get(&assertion_id).cloned())
    }

    async fn add_prediction(
        &self,
        assertion_id: i64,
        user_id: &str,
        prediction: Prediction,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner.assertions.get_mut(&assertion_id) else {
            return Ok(false);
        };
        if row.predictions.contains_key(user_id) {
            return Ok(false);
        }
        row.predictions.insert(user_id.to_string(), prediction);
        Ok(true)
    }

    async fn set_vote(&self, assertion_id: i64, user_id: &str, vote: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(row) = inner.assertions.get_mut(&assertion_id) {
            row.votes.insert(user_id.to_string(), vote);
        }
        Ok(())
    }

    async fn complete_assertion(&self, assertion_id: i64, final_answer: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(row) = inner.assertions.get_mut(&assertion_id) {
            row.completed = true;
            row.final_answer = final_answer;
        }
        Ok(())
    }
}
