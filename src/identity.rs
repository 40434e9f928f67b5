// src/identity.rs
// Bearer-token verification against the external identity provider

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, ServerError};

/// Identity and profile fields carried by a verified bearer token.
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    pub subject: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: String,
}

/// Verifies an opaque bearer token into an identity. The provider itself is
/// an external collaborator; this seam is all the core depends on.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaims>;
}

/// Verifier backed by an identity-toolkit style `accounts:lookup` endpoint.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    photo_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims> {
        let url = format!("{}/v1/accounts:lookup?key={}", self.base_url, self.api_key);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "idToken": token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServerError::Identity(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let lookup: LookupResponse = response.json().await?;
        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or_else(|| ServerError::Identity("token matched no account".to_string()))?;

        debug!(subject = %user.local_id, "token verified");
        Ok(IdentityClaims {
            subject: user.local_id,
            display_name: if user.display_name.is_empty() {
                "Unknown User".to_string()
            } else {
                user.display_name
            },
            email: user.email,
            photo_url: user.photo_url,
        })
    }
}

/// Fixed token→identity table, for tests and local development. Unknown
/// tokens fail like an expired token would.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    tokens: RwLock<HashMap<String, IdentityClaims>>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, claims: IdentityClaims) {
        self.tokens.write().insert(token.to_string(), claims);
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaims> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| ServerError::Identity("unknown token".to_string()))
    }
}
