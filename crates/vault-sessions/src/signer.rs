use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;
use vault_core::config::SessionsConfig;

use crate::error::{Result, SessionError};
use crate::types::TokenClaims;

type HmacSha256 = Hmac<Sha256>;

/// Signing primitive for session tokens.
///
/// `verify` checks integrity only; expiry and revocation are the caller's
/// job.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &TokenClaims) -> Result<String>;
    fn verify(&self, token: &str) -> Result<TokenClaims>;
}

/// HMAC-SHA256 tokens: `base64url(claims json) "." hex(mac)`.
pub struct HmacSigner {
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// Fresh 256-bit key for this process only.
    pub fn ephemeral() -> Self {
        let mut key = Vec::with_capacity(32);
        key.extend_from_slice(Uuid::new_v4().as_bytes());
        key.extend_from_slice(Uuid::new_v4().as_bytes());
        Self { key }
    }

    pub fn from_config(cfg: &SessionsConfig) -> Self {
        match cfg.secret.as_deref() {
            Some(secret) if !secret.is_empty() => Self::new(secret),
            _ => {
                warn!(
                    "sessions.secret not set; using a per-process key, tokens will not \
                     validate on other instances or after restart"
                );
                Self::ephemeral()
            }
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| SessionError::SigningKey(e.to_string()))?;
        mac.update(payload);
        Ok(mac)
    }
}

impl TokenSigner for HmacSigner {
    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let sig = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        Ok(format!("{payload}.{sig}"))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims> {
        let (payload, sig_hex) = token
            .split_once('.')
            .ok_or_else(|| SessionError::Malformed("missing signature".to_string()))?;
        let sig = hex::decode(sig_hex)
            .map_err(|_| SessionError::Malformed("signature is not valid hex".to_string()))?;

        self.mac(payload.as_bytes())?
            .verify_slice(&sig)
            .map_err(|_| SessionError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed("payload is not base64url".to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> TokenClaims {
        TokenClaims {
            sub: "alice".into(),
            iat: 1_700_000_000,
            exp: 1_700_086_400,
            jti: "a1".into(),
        }
    }

    #[test]
    fn sign_then_verify() {
        let signer = HmacSigner::new("s3cret");
        let token = signer.sign(&claims()).unwrap();
        assert_eq!(token.split('.').count(), 2);
        assert_eq!(signer.verify(&token).unwrap(), claims());
    }

    #[test]
    fn empty_secret_still_signs() {
        let signer = HmacSigner::new("");
        let token = signer.sign(&claims()).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), claims());
        assert!(matches!(
            HmacSigner::new("other").verify(&token),
            Err(SessionError::BadSignature)
        ));
    }

    #[test]
    fn tampered_payload_fails() {
        let signer = HmacSigner::new("s3cret");
        let token = signer.sign(&claims()).unwrap();
        let (_, sig) = token.split_once('.').unwrap();

        let mut forged = claims();
        forged.sub = "mallory".into();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let err = signer.verify(&format!("{forged_payload}.{sig}")).unwrap_err();
        assert!(matches!(err, SessionError::BadSignature));
    }

    #[test]
    fn other_key_fails() {
        let token = HmacSigner::new("one").sign(&claims()).unwrap();
        assert!(matches!(
            HmacSigner::new("two").verify(&token),
            Err(SessionError::BadSignature)
        ));
        assert!(matches!(
            HmacSigner::ephemeral().verify(&token),
            Err(SessionError::BadSignature)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let signer = HmacSigner::new("s3cret");
        assert!(matches!(signer.verify("no-dot"), Err(SessionError::Malformed(_))));
        assert!(matches!(signer.verify("abc.zz"), Err(SessionError::Malformed(_))));
    }

    #[test]
    fn empty_secret_in_config_falls_back_to_ephemeral() {
        let cfg = SessionsConfig {
            secret: Some(String::new()),
            ..SessionsConfig::default()
        };
        let a = HmacSigner::from_config(&cfg);
        let b = HmacSigner::from_config(&cfg);
        assert_ne!(a.key, b.key);
        assert_eq!(a.key.len(), 32);
    }
}
