// src/handlers/auth.rs
// `user`: bearer-token authentication and user upsert

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatch::Handler;
use crate::error::Result;
use crate::server::AppContext;
use crate::session::Session;
use crate::store::NewUser;

use super::send_chat_list;

/// Verifies the presented token, creates or refreshes the user, binds the
/// session to the identity, and registers it for event delivery. Replies
/// `token_ok ‖ displayName` and pushes the fresh chat listing.
pub struct Authenticate;

#[async_trait]
impl Handler for Authenticate {
    fn code(&self) -> &'static str {
        "user"
    }

    fn requires_auth(&self) -> bool {
        false
    }

    async fn handle(
        &self,
        ctx: &AppContext,
        session: &Arc<Session>,
        payload: &str,
    ) -> Result<bool> {
        let claims = match ctx.identity.verify(payload.trim()).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!(session = session.id(), "token verification failed: {e}");
                session.send("", b"token_fail").await?;
                return Ok(true);
            }
        };

        let user = NewUser {
            user_id: &claims.subject,
            display_name: &claims.display_name,
            email: &claims.email,
            photo_url: &claims.photo_url,
        };
        if let Err(e) = ctx.store.upsert_user(user).await {
            warn!(subject = %claims.subject, "user upsert failed: {e}");
            session.send("", b"token_fail").await?;
            return Ok(true);
        }
        // A re-login may carry refreshed profile fields.
        ctx.profiles.invalidate(&claims.subject).await;

        session.bind_user(&claims.subject);
        ctx.events.register(&claims.subject, session.clone());
        info!(session = session.id(), subject = %claims.subject, "user authenticated");

        session
            .send("token_ok", claims.display_name.as_bytes())
            .await?;
        send_chat_list(ctx, session).await?;
        Ok(true)
    }
}
