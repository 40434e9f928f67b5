// src/store/mod.rs
// Persistence adapter: opaque rows keyed by id, JSON-typed columns

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::Result;
use crate::model::{MessageEntry, Prediction, Profile};

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// Profile fields carried by a verified bearer token.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub user_id: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
    pub photo_url: &'a str,
}

/// The columns the `chts` listing needs.
#[derive(Debug, Clone)]
pub struct ChatSummaryRow {
    pub id: i64,
    pub name: String,
    pub last_message: String,
}

/// Per-chat scoring state, both maps keyed by user id (same key set).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatStats {
    pub score_sum: BTreeMap<String, i64>,
    pub predictions: BTreeMap<String, i64>,
}

/// Fields of a newly authored assertion; dates are already validated and
/// stripped to naive UTC.
#[derive(Debug, Clone)]
pub struct NewAssertion<'a> {
    pub author: &'a str,
    pub chat_id: i64,
    pub text: &'a str,
    pub validation_date: NaiveDateTime,
    pub casting_deadline: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// A full assertion row.
#[derive(Debug, Clone)]
pub struct AssertionRow {
    pub id: i64,
    pub author: String,
    pub chat_id: i64,
    pub text: String,
    pub predictions: BTreeMap<String, Prediction>,
    pub votes: BTreeMap<String, bool>,
    pub validation_date: NaiveDateTime,
    pub casting_deadline: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub completed: bool,
    pub final_answer: bool,
}

/// The persistence seam. Implementations expose whole-row reads and
/// read-modify-write column updates; callers provide the serialization
/// discipline (per-chat locks) that makes the read-modify-write safe.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the user on first sight, refresh profile columns otherwise.
    /// Never touches the user's chat list.
    async fn upsert_user(&self, user: NewUser<'_>) -> Result<()>;

    /// Public profile for a user; missing users yield an empty profile.
    async fn user_profile(&self, user_id: &str) -> Result<Profile>;

    /// Ids of the chats a user belongs to, in join order.
    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<i64>>;

    /// Listing columns for the given chats.
    async fn chats_by_ids(&self, ids: &[i64]) -> Result<Vec<ChatSummaryRow>>;

    /// Create a chat with the creator as sole member and zeroed stats,
    /// and record the chat on the creator's side as well.
    async fn create_chat(&self, name: &str, creator: &str) -> Result<i64>;

    /// Member user ids of a chat, in join order. Unknown chats are empty.
    async fn chat_members(&self, chat_id: i64) -> Result<Vec<String>>;

    /// Add a user to a chat: members list, zeroed stat entries, and the
    /// user's own chat list. Caller checks membership first.
    async fn add_member(&self, chat_id: i64, user_id: &str) -> Result<()>;

    /// Full message log of a chat.
    async fn chat_messages(&self, chat_id: i64) -> Result<Vec<MessageEntry>>;

    /// Append one entry; when `last_message` is given the chat's preview
    /// line is updated in the same write.
    async fn append_message(
        &self,
        chat_id: i64,
        entry: &MessageEntry,
        last_message: Option<&str>,
    ) -> Result<()>;

    async fn chat_stats(&self, chat_id: i64) -> Result<ChatStats>;

    async fn update_chat_stats(&self, chat_id: i64, stats: &ChatStats) -> Result<()>;

    async fn create_assertion(&self, assertion: NewAssertion<'_>) -> Result<i64>;

    async fn assertion(&self, assertion_id: i64) -> Result<Option<AssertionRow>>;

    /// Record a first-time forecast. Returns `false` without writing when
    /// the user already has one (predictions are immutable).
    async fn add_prediction(
        &self,
        assertion_id: i64,
        user_id: &str,
        prediction: Prediction,
    ) -> Result<bool>;

    /// Record or replace a user's outcome vote.
    async fn set_vote(&self, assertion_id: i64, user_id: &str, vote: bool) -> Result<()>;

    /// Terminal transition: mark completed and fix the final answer.
    async fn complete_assertion(&self, assertion_id: i64, final_answer: bool) -> Result<()>;
}
