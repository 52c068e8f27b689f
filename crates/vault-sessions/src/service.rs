use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vault_core::config::SessionsConfig;
use vault_store::CoordinationStore;

use crate::error::{Result, SessionError};
use crate::signer::{HmacSigner, TokenSigner};
use crate::types::{IssuedToken, TokenClaims};

pub const TOKEN_KEY_PREFIX: &str = "session:token:";
pub const USER_KEY_PREFIX: &str = "session:user:";

fn token_key(token: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{token}")
}

fn user_key(username: &str) -> String {
    format!("{USER_KEY_PREFIX}{username}")
}

/// Issues and validates bearer tokens.
///
/// Writes always go `token → username` first and `username → token` second.
/// The store has no multi-key transaction, so a failure between the two
/// leaves at most an orphan `token → username` entry that lapses with its
/// lease. A user entry whose token entry is missing is repaired on the next
/// `issue_token` for that user.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CoordinationStore>,
    signer: Arc<dyn TokenSigner>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn CoordinationStore>, signer: Arc<dyn TokenSigner>, ttl: Duration) -> Self {
        Self { store, signer, ttl }
    }

    pub fn from_config(store: Arc<dyn CoordinationStore>, cfg: &SessionsConfig) -> Self {
        Self::new(
            store,
            Arc::new(HmacSigner::from_config(cfg)),
            Duration::from_secs(cfg.ttl_secs.max(1)),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the user's live token, or mint and store a new one.
    #[instrument(skip(self))]
    pub async fn issue_token(&self, username: &str) -> Result<IssuedToken> {
        if username.is_empty() {
            return Err(SessionError::InvalidUsername("empty".to_string()));
        }

        if let Some(existing) = self.store.get(&user_key(username)).await? {
            if let Some(issued) = self.reuse(username, existing.clone()).await? {
                return Ok(issued);
            }
            // Unusable (signed with another key, or claim ran out before the
            // lease): clear it so the fresh token can take its place.
            self.store
                .compare_and_delete(&user_key(username), &existing)
                .await?;
        }

        let (token, claims) = self.mint(username)?;
        self.store.set(&token_key(&token), username, self.ttl).await?;
        if !self
            .store
            .set_if_absent(&user_key(username), &token, self.ttl)
            .await?
        {
            // A concurrent login for this user got there first; hand out its
            // token so the user still ends up with exactly one.
            self.store.delete(&token_key(&token)).await?;
            let winner = self.store.get(&user_key(username)).await?;
            return match winner {
                Some(winner) => self
                    .reuse(username, winner)
                    .await?
                    .ok_or_else(|| SessionError::Contended {
                        username: username.to_string(),
                    }),
                None => Err(SessionError::Contended {
                    username: username.to_string(),
                }),
            };
        }

        info!(jti = %claims.jti, ttl_secs = self.ttl.as_secs(), "session issued");
        Ok(IssuedToken {
            token,
            username: username.to_string(),
            expires_at: claims.expires_at(),
            reused: false,
        })
    }

    /// Username for `token`, or the reason it is not valid.
    ///
    /// The store is consulted first; a miss is `Revoked` even for a token
    /// that would verify. Store errors come back as `Store` and must also be
    /// treated as invalid.
    #[instrument(skip_all)]
    pub async fn validate_token(&self, token: &str) -> Result<String> {
        let Some(username) = self.store.get(&token_key(token)).await? else {
            debug!("token not present in store");
            return Err(SessionError::Revoked);
        };
        let claims = self.signer.verify(token)?;
        if claims.is_expired_at(Utc::now()) {
            return Err(SessionError::Expired);
        }
        if claims.sub != username {
            warn!(user = %username, "token claim subject does not match stored owner");
            return Err(SessionError::SubjectMismatch);
        }
        Ok(username)
    }

    /// Replace a valid token with a fresh one carrying a new expiry. The old
    /// token stops validating.
    #[instrument(skip_all)]
    pub async fn refresh_token(&self, token: &str) -> Result<IssuedToken> {
        let username = self.validate_token(token).await?;
        let (fresh, claims) = self.mint(&username)?;

        self.store.set(&token_key(&fresh), &username, self.ttl).await?;
        self.store.set(&user_key(&username), &fresh, self.ttl).await?;
        self.store
            .compare_and_delete(&token_key(token), &username)
            .await?;

        info!(user = %username, jti = %claims.jti, "session refreshed");
        Ok(IssuedToken {
            token: fresh,
            username,
            expires_at: claims.expires_at(),
            reused: false,
        })
    }

    /// Log out: drop both mappings. `false` if the token was already unknown.
    #[instrument(skip_all)]
    pub async fn revoke_token(&self, token: &str) -> Result<bool> {
        let Some(username) = self.store.get(&token_key(token)).await? else {
            return Ok(false);
        };
        // Only clear the user entry if it still points at this token.
        self.store
            .compare_and_delete(&user_key(&username), token)
            .await?;
        let removed = self.store.delete(&token_key(token)).await?;
        info!(user = %username, "session revoked");
        Ok(removed)
    }

    fn mint(&self, username: &str) -> Result<(String, TokenClaims)> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: username.to_string(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.signer.sign(&claims)?;
        Ok((token, claims))
    }

    /// `Some` if `token` is still a good session for `username`, restoring
    /// its `token → username` entry when that one went missing.
    async fn reuse(&self, username: &str, token: String) -> Result<Option<IssuedToken>> {
        let claims = match self.signer.verify(&token) {
            Ok(c) => c,
            Err(e) => {
                warn!("stored token no longer verifies: {e}");
                return Ok(None);
            }
        };
        let now = Utc::now();
        if claims.sub != username || claims.is_expired_at(now) {
            return Ok(None);
        }

        if self.store.get(&token_key(&token)).await?.is_none() {
            warn!("token entry missing for live session; restoring");
            let remaining = Duration::from_secs(claims.remaining_secs(now).max(1)).min(self.ttl);
            self.store.set(&token_key(&token), username, remaining).await?;
        }

        debug!("reusing live token");
        Ok(Some(IssuedToken {
            token,
            username: username.to_string(),
            expires_at: claims.expires_at(),
            reused: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_store::MemoryStore;

    fn service() -> (SessionService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let svc = SessionService::new(
            store.clone(),
            Arc::new(HmacSigner::new("test-secret")),
            Duration::from_secs(3600),
        );
        (svc, store)
    }

    #[tokio::test]
    async fn issue_writes_both_mappings() {
        let (svc, store) = service();
        let issued = svc.issue_token("alice").await.unwrap();
        assert!(!issued.reused);
        assert_eq!(
            store.get(&token_key(&issued.token)).await.unwrap().as_deref(),
            Some("alice")
        );
        assert_eq!(
            store.get(&user_key("alice")).await.unwrap().as_deref(),
            Some(issued.token.as_str())
        );
    }

    #[tokio::test]
    async fn empty_username_is_rejected() {
        let (svc, _) = service();
        assert!(matches!(
            svc.issue_token("").await,
            Err(SessionError::InvalidUsername(_))
        ));
    }

    #[tokio::test]
    async fn stored_token_from_another_key_is_replaced() {
        let (svc, store) = service();
        let foreign = HmacSigner::new("old-secret")
            .sign(&TokenClaims {
                sub: "alice".into(),
                iat: Utc::now().timestamp(),
                exp: Utc::now().timestamp() + 3600,
                jti: "old".into(),
            })
            .unwrap();
        store
            .set(&user_key("alice"), &foreign, Duration::from_secs(3600))
            .await
            .unwrap();

        let issued = svc.issue_token("alice").await.unwrap();
        assert!(!issued.reused);
        assert_ne!(issued.token, foreign);
        assert_eq!(svc.validate_token(&issued.token).await.unwrap(), "alice");
    }
}
