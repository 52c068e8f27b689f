use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use vault_sessions::{HmacSigner, SessionError, SessionService, TokenClaims, TokenSigner};
use vault_store::{CoordinationStore, MemoryStore, StoreError};

const TTL: Duration = Duration::from_secs(24 * 3600);

fn service(store: Arc<dyn CoordinationStore>) -> SessionService {
    SessionService::new(store, Arc::new(HmacSigner::new("shared-secret")), TTL)
}

#[tokio::test]
async fn repeat_login_returns_the_same_token() {
    let svc = service(Arc::new(MemoryStore::new()));
    let first = svc.issue_token("alice").await.unwrap();
    let second = svc.issue_token("alice").await.unwrap();

    assert_eq!(first.token, second.token);
    assert!(second.reused);
    assert_ne!(svc.issue_token("bob").await.unwrap().token, first.token);
}

#[tokio::test]
async fn concurrent_logins_converge_on_one_token() {
    let svc = service(Arc::new(MemoryStore::new()));
    let (a, b) = tokio::join!(svc.issue_token("alice"), svc.issue_token("alice"));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.token, b.token);
    assert_eq!(svc.validate_token(&a.token).await.unwrap(), "alice");
}

#[tokio::test]
async fn deleted_store_entry_invalidates_a_well_signed_token() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let svc = service(Arc::clone(&store));
    let issued = svc.issue_token("alice").await.unwrap();
    assert_eq!(svc.validate_token(&issued.token).await.unwrap(), "alice");

    store
        .delete(&format!("session:token:{}", issued.token))
        .await
        .unwrap();
    assert!(matches!(
        svc.validate_token(&issued.token).await,
        Err(SessionError::Revoked)
    ));
}

#[tokio::test(start_paused = true)]
async fn lapsed_lease_invalidates_before_claim_expiry() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let svc = SessionService::new(
        Arc::clone(&store),
        Arc::new(HmacSigner::new("shared-secret")),
        Duration::from_secs(60),
    );
    let issued = svc.issue_token("alice").await.unwrap();

    // Store time is virtual; the embedded wall-clock claim has not run out.
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(issued.expires_at > Utc::now());
    assert!(matches!(
        svc.validate_token(&issued.token).await,
        Err(SessionError::Revoked)
    ));
}

#[tokio::test]
async fn missing_token_entry_is_repaired_on_login() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let svc = service(Arc::clone(&store));
    let issued = svc.issue_token("alice").await.unwrap();
    store
        .delete(&format!("session:token:{}", issued.token))
        .await
        .unwrap();

    let again = svc.issue_token("alice").await.unwrap();
    assert_eq!(again.token, issued.token);
    assert_eq!(svc.validate_token(&again.token).await.unwrap(), "alice");
}

#[tokio::test]
async fn expired_claim_is_rejected_on_store_hit() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let signer = HmacSigner::new("shared-secret");
    let svc = service(Arc::clone(&store));

    let now = Utc::now().timestamp();
    let stale = signer
        .sign(&TokenClaims {
            sub: "alice".into(),
            iat: now - 7200,
            exp: now - 3600,
            jti: "stale".into(),
        })
        .unwrap();
    store
        .set(&format!("session:token:{stale}"), "alice", TTL)
        .await
        .unwrap();

    assert!(matches!(
        svc.validate_token(&stale).await,
        Err(SessionError::Expired)
    ));
}

#[tokio::test]
async fn forged_mapping_is_rejected() {
    let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
    let svc = service(Arc::clone(&store));
    let issued = svc.issue_token("alice").await.unwrap();

    // Store says "mallory", claim says "alice".
    store
        .set(&format!("session:token:{}", issued.token), "mallory", TTL)
        .await
        .unwrap();
    assert!(matches!(
        svc.validate_token(&issued.token).await,
        Err(SessionError::SubjectMismatch)
    ));

    // Signature from another key with a matching store entry.
    let now = Utc::now().timestamp();
    let foreign = HmacSigner::new("other")
        .sign(&TokenClaims {
            sub: "alice".into(),
            iat: now,
            exp: now + 3600,
            jti: "x".into(),
        })
        .unwrap();
    store
        .set(&format!("session:token:{foreign}"), "alice", TTL)
        .await
        .unwrap();
    assert!(matches!(
        svc.validate_token(&foreign).await,
        Err(SessionError::BadSignature)
    ));
}

#[tokio::test]
async fn refresh_rotates_the_token() {
    let svc = service(Arc::new(MemoryStore::new()));
    let old = svc.issue_token("alice").await.unwrap();
    let fresh = svc.refresh_token(&old.token).await.unwrap();

    assert_ne!(fresh.token, old.token);
    assert!(svc.validate_token(&old.token).await.is_err());
    assert_eq!(svc.validate_token(&fresh.token).await.unwrap(), "alice");
    assert_eq!(svc.issue_token("alice").await.unwrap().token, fresh.token);
}

#[tokio::test]
async fn logout_revokes_both_mappings() {
    let svc = service(Arc::new(MemoryStore::new()));
    let issued = svc.issue_token("alice").await.unwrap();

    assert!(svc.revoke_token(&issued.token).await.unwrap());
    assert!(!svc.revoke_token(&issued.token).await.unwrap());
    assert!(svc.validate_token(&issued.token).await.is_err());

    let next = svc.issue_token("alice").await.unwrap();
    assert!(!next.reused);
    assert_ne!(next.token, issued.token);
}

struct DownStore;

#[async_trait]
impl CoordinationStore for DownStore {
    fn name(&self) -> &str {
        "down"
    }
    async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("timeout".into()))
    }
    async fn compare_and_delete(&self, _: &str, _: &str) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("timeout".into()))
    }
    async fn get(&self, _: &str) -> vault_store::Result<Option<String>> {
        Err(StoreError::Unavailable("timeout".into()))
    }
    async fn set(&self, _: &str, _: &str, _: Duration) -> vault_store::Result<()> {
        Err(StoreError::Unavailable("timeout".into()))
    }
    async fn delete(&self, _: &str) -> vault_store::Result<bool> {
        Err(StoreError::Unavailable("timeout".into()))
    }
    async fn purge_expired(&self) -> vault_store::Result<usize> {
        Err(StoreError::Unavailable("timeout".into()))
    }
}

#[tokio::test]
async fn unreachable_store_means_invalid() {
    let svc = service(Arc::new(DownStore));
    let now = Utc::now().timestamp();
    let token = HmacSigner::new("shared-secret")
        .sign(&TokenClaims {
            sub: "alice".into(),
            iat: now,
            exp: now + 3600,
            jti: "ok".into(),
        })
        .unwrap();

    assert!(matches!(
        svc.validate_token(&token).await,
        Err(SessionError::Store(_))
    ));
    assert!(svc.issue_token("alice").await.is_err());
}
