// src/tokens.rs
// Join-token and push-topic derivation from the shared chat secret

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

/// Length of the truncated base64 hash carried in a join token.
const JOIN_HASH_LEN: usize = 16;

fn chat_digest(chat_id: &str, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chat_id.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Truncated base64 hash binding a join token to a chat.
pub fn join_token_hash(chat_id: &str, secret: &str) -> String {
    let mut encoded = BASE64.encode(chat_digest(chat_id, secret));
    encoded.truncate(JOIN_HASH_LEN);
    encoded
}

/// Full join token: `hash16 "." base64(chatId)`.
pub fn join_token(chat_id: &str, secret: &str) -> String {
    format!(
        "{}.{}",
        join_token_hash(chat_id, secret),
        BASE64.encode(chat_id.as_bytes())
    )
}

/// Split a presented join token into its hash and the decoded chat id.
/// Returns `None` for anything that does not parse; the hash itself is
/// verified by the caller.
pub fn parse_join_token(token: &str) -> Option<(String, String)> {
    let (hash, encoded_chat) = token.split_once('.')?;
    if hash.is_empty() || encoded_chat.is_empty() {
        return None;
    }
    let decoded = BASE64.decode(encoded_chat).ok()?;
    let chat_id = String::from_utf8(decoded).ok()?;
    Some((hash.to_string(), chat_id))
}

/// Push-notification topic for a chat: `chat_` + lowercase hex of the digest.
pub fn chat_topic(chat_id: &str, secret: &str) -> String {
    let digest = chat_digest(chat_id, secret);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("chat_{hex}")
}
