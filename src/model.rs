// src/model.rs
// Domain types and wire-facing JSON views

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Public profile fields shown to other chat members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: String,
    pub photo_url: String,
}

/// One forecast on an assertion: how confident, and which way.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub confidence: f64,
    pub forecast: bool,
}

/// A chat log entry. Text messages carry their content inline; assertions
/// are stored by reference and resolved at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEntry {
    Text {
        sender: String,
        timestamp: DateTime<Utc>,
        content: String,
    },
    Assertion {
        #[serde(rename = "assertionId")]
        assertion_id: i64,
    },
}

/// One row of the `chts` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub name: String,
    pub last_message: String,
    pub chat_id: String,
}

/// One row of the `memb` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub display_name: String,
    pub photo_url: String,
    pub elo: i64,
}

/// A forecast as shown to chat members: predictor profile plus the forecast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionView {
    pub display_name: String,
    pub photo_url: String,
    pub confidence: f64,
    pub forecast: bool,
}

/// Assertion state as carried inside `assr` events and resolved messages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionContent {
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub validation_date: String,
    pub casting_forecast_deadline: String,
    pub completed: bool,
    pub final_answer: bool,
    pub predictions: Vec<PredictionView>,
    pub did_predict: bool,
}

/// A text message as delivered to clients, sender enriched to a profile.
#[derive(Debug, Clone, Serialize)]
pub struct TextMessageView {
    pub sender: Profile,
    pub timestamp: String,
    pub content: String,
}

/// An assertion as it appears in a chat's message list.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionMessageView {
    pub sender: Profile,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: AssertionContent,
}

impl AssertionMessageView {
    pub fn new(sender: Profile, timestamp: String, content: AssertionContent) -> Self {
        Self {
            sender,
            timestamp,
            kind: "assertion",
            content,
        }
    }
}

/// A resolved entry of the `msgs` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageView {
    Text(TextMessageView),
    Assertion(AssertionMessageView),
}

/// Parse a client-supplied ISO-8601 instant. Accepts an explicit offset
/// (including a trailing `Z`) or a bare local-less datetime taken as UTC.
pub fn parse_client_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

/// Render a persisted datetime the way clients sent it: no zone suffix.
pub fn wire_datetime(naive: NaiveDateTime) -> String {
    naive.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Render a persisted instant as an RFC-3339 UTC timestamp.
pub fn wire_timestamp(naive: NaiveDateTime) -> String {
    naive.and_utc().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn message_entry_text_round_trip() {
        let entry = MessageEntry::Text {
            sender: "uid-1".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap(),
            content: "hello".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""type":"text""#));
        let back: MessageEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn message_entry_assertion_uses_reference() {
        let entry = MessageEntry::Assertion { assertion_id: 42 };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"type":"assertion","assertionId":42}"#);
        let back: MessageEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn parse_client_datetime_accepts_zulu_and_naive() {
        let with_zone = parse_client_datetime("2025-06-10T00:00:00.000Z").unwrap();
        let naive = parse_client_datetime("2025-06-10T00:00:00.000").unwrap();
        assert_eq!(with_zone, naive);
        assert!(parse_client_datetime("not a date").is_none());
    }

    #[test]
    fn wire_datetime_has_no_zone_suffix() {
        let naive = NaiveDateTime::parse_from_str("2025-06-10T08:30:00", "%Y-%m-%dT%H:%M:%S")
            .unwrap();
        assert_eq!(wire_datetime(naive), "2025-06-10T08:30:00.000");
        assert!(wire_timestamp(naive).ends_with('Z'));
    }
}
