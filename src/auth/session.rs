//! Signed session tokens.
//!
//! A token is `base64url(claims_json) "." base64url(hmac_sha256(context || claims_json))`.
//! The fixed context label keeps session MACs apart from OTP digests when
//! both are keyed with the same server secret.
//! The only identity claim is the user's [`Identity`]. Tokens are valid for
//! `timeout` after issue and can still be refreshed for `max_refresh` after
//! they expire. A refreshed token gets a new validity window and keeps the
//! original login time in `orig_iat`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use super::time_step::Clock;
use crate::models::Identity;

type HmacSha256 = Hmac<Sha256>;

/// Prefixed to every signed payload.
const SESSION_CONTEXT: &[u8] = b"pantree-session\0";

/// Default token lifetime.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default refresh allowance past expiry.
pub const DEFAULT_MAX_REFRESH: Duration = Duration::from_secs(60 * 60);

/// Errors validating or refreshing a token.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is too old to refresh")]
    RefreshExpired,
    #[error("session signing key must not be empty")]
    EmptyKey,
}

/// Claims carried by a session token. Times are epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub id: Identity,
    pub iat: i64,
    pub exp: i64,
    pub orig_iat: i64,
}

/// An issued token and its expiry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SignedSession {
    pub token: String,
    #[serde(rename = "expire")]
    pub expires_at: DateTime<Utc>,
}

/// Where a token sits in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Signature valid and not yet expired.
    Active,
    /// Expired but still inside the refresh window.
    Refreshable,
    /// Past both windows.
    Expired,
    /// Not a token this server signed.
    Invalid,
}

/// Mints and validates session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    keyed: HmacSha256,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    max_refresh: Duration,
}

impl SessionIssuer {
    pub fn new(key: &[u8], clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        if key.is_empty() {
            return Err(SessionError::EmptyKey);
        }
        let mut keyed = HmacSha256::new_from_slice(key).map_err(|_| SessionError::EmptyKey)?;
        keyed.update(SESSION_CONTEXT);
        Ok(Self {
            keyed,
            clock,
            timeout: DEFAULT_TIMEOUT,
            max_refresh: DEFAULT_MAX_REFRESH,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_refresh(mut self, max_refresh: Duration) -> Self {
        self.max_refresh = max_refresh;
        self
    }

    fn now_secs(&self) -> i64 {
        self.clock.now_millis().div_euclid(1000)
    }

    /// Issues a token for `identity`.
    pub fn issue(&self, identity: Identity) -> SignedSession {
        let now = self.now_secs();
        self.sign(SessionClaims {
            id: identity,
            iat: now,
            exp: now + self.timeout.as_secs() as i64,
            orig_iat: now,
        })
    }

    /// Validates signature, claim shape and expiry.
    pub fn verify(&self, token: &str) -> Result<Identity, SessionError> {
        let claims = self.decode(token)?;
        if claims.exp < self.now_secs() {
            return Err(SessionError::Expired);
        }
        Ok(claims.id)
    }

    /// Exchanges a token, expired or not, for a fresh one while inside the
    /// refresh window.
    pub fn refresh(&self, token: &str) -> Result<SignedSession, SessionError> {
        let claims = self.decode(token)?;
        let now = self.now_secs();
        if self.refresh_deadline(&claims) < now {
            return Err(SessionError::RefreshExpired);
        }
        Ok(self.sign(SessionClaims {
            id: claims.id,
            iat: now,
            exp: now + self.timeout.as_secs() as i64,
            orig_iat: claims.orig_iat,
        }))
    }

    fn refresh_deadline(&self, claims: &SessionClaims) -> i64 {
        claims.exp + self.max_refresh.as_secs() as i64
    }

    pub fn inspect(&self, token: &str) -> SessionState {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(_) => return SessionState::Invalid,
        };
        let now = self.now_secs();
        if claims.exp >= now {
            SessionState::Active
        } else if self.refresh_deadline(&claims) >= now {
            SessionState::Refreshable
        } else {
            SessionState::Expired
        }
    }

    fn sign(&self, claims: SessionClaims) -> SignedSession {
        // Serializing a struct of plain fields cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();

        let mut mac = self.keyed.clone();
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();

        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        );
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or_else(Utc::now);

        SignedSession { token, expires_at }
    }

    fn decode(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let (payload_b64, signature_b64) =
            token.trim().split_once('.').ok_or(SessionError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64.as_bytes())
            .map_err(|_| SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| SessionError::Malformed)?;

        let mut mac = self.keyed.clone();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)
    }
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("timeout", &self.timeout)
            .field("max_refresh", &self.max_refresh)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::time_step::ManualClock;

    const T0: i64 = 1_700_000_000_000;
    const MINUTE_MS: i64 = 60_000;

    fn new_issuer() -> (SessionIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let issuer = SessionIssuer::new(b"session-key", clock.clone()).unwrap();
        (issuer, clock)
    }

    #[test]
    fn test_empty_key_rejected() {
        let clock = Arc::new(ManualClock::new(T0));
        assert_eq!(
            SessionIssuer::new(b"", clock).err(),
            Some(SessionError::EmptyKey)
        );
    }

    #[test]
    fn test_issue_and_verify() {
        let (issuer, _clock) = new_issuer();
        let id = Identity::new();

        let session = issuer.issue(id);

        assert_eq!(issuer.verify(&session.token).unwrap(), id);
        assert_eq!(session.expires_at.timestamp(), T0 / 1000 + 3600);
        assert_eq!(issuer.inspect(&session.token), SessionState::Active);
    }

    #[test]
    fn test_expires_after_one_hour() {
        let (issuer, clock) = new_issuer();
        let session = issuer.issue(Identity::new());

        clock.advance(60 * MINUTE_MS);
        assert!(issuer.verify(&session.token).is_ok());

        clock.advance(1_000);
        assert_eq!(issuer.verify(&session.token), Err(SessionError::Expired));
        assert_eq!(issuer.inspect(&session.token), SessionState::Refreshable);
    }

    #[test]
    fn test_refresh_resets_window() {
        let (issuer, clock) = new_issuer();
        let id = Identity::new();
        let session = issuer.issue(id);

        clock.advance(90 * MINUTE_MS);
        assert_eq!(issuer.verify(&session.token), Err(SessionError::Expired));

        let refreshed = issuer.refresh(&session.token).unwrap();
        assert_eq!(refreshed.expires_at.timestamp(), (T0 + 150 * MINUTE_MS) / 1000);

        clock.set(T0 + 140 * MINUTE_MS);
        assert_eq!(issuer.verify(&refreshed.token).unwrap(), id);
    }

    #[test]
    fn test_refresh_window_elapsed() {
        let (issuer, clock) = new_issuer();
        let session = issuer.issue(Identity::new());

        clock.advance(121 * MINUTE_MS);
        assert_eq!(
            issuer.refresh(&session.token).err(),
            Some(SessionError::RefreshExpired)
        );
        assert_eq!(issuer.inspect(&session.token), SessionState::Expired);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let (issuer, _clock) = new_issuer();
        let session = issuer.issue(Identity::new());
        let (_, sig) = session.token.split_once('.').unwrap();

        let forged_claims = SessionClaims {
            id: Identity::new(),
            iat: 0,
            exp: i64::MAX,
            orig_iat: 0,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}", forged_payload, sig);

        assert_eq!(issuer.verify(&forged), Err(SessionError::BadSignature));
        assert_eq!(issuer.inspect(&forged), SessionState::Invalid);
    }

    #[test]
    fn test_other_key_rejected() {
        let (issuer, clock) = new_issuer();
        let other = SessionIssuer::new(b"different-key", clock).unwrap();
        let session = other.issue(Identity::new());

        assert_eq!(issuer.verify(&session.token), Err(SessionError::BadSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let (issuer, _clock) = new_issuer();
        assert_eq!(issuer.verify(""), Err(SessionError::Malformed));
        assert_eq!(issuer.verify("no-dot-here"), Err(SessionError::Malformed));
        assert_eq!(issuer.verify("!!!.???"), Err(SessionError::Malformed));
    }

    #[test]
    fn test_signed_non_claims_payload_is_malformed() {
        let (issuer, _clock) = new_issuer();
        let payload = br#"{"hello":"world"}"#;
        let mut mac = HmacSha256::new_from_slice(b"session-key").unwrap();
        mac.update(SESSION_CONTEXT);
        mac.update(payload);
        let sig = mac.finalize().into_bytes();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(sig)
        );

        assert_eq!(issuer.verify(&token), Err(SessionError::Malformed));
    }

    #[test]
    fn test_bare_mac_under_same_key_rejected() {
        let (issuer, _clock) = new_issuer();
        let claims = SessionClaims {
            id: Identity::new(),
            iat: T0 / 1000,
            exp: T0 / 1000 + 3600,
            orig_iat: T0 / 1000,
        };
        let payload = serde_json::to_vec(&claims).unwrap();
        let mut mac = HmacSha256::new_from_slice(b"session-key").unwrap();
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        );

        assert_eq!(issuer.verify(&token), Err(SessionError::BadSignature));
    }

    #[test]
    fn test_custom_timeout() {
        let (issuer, clock) = new_issuer();
        let issuer = issuer.with_timeout(Duration::from_secs(60));
        let session = issuer.issue(Identity::new());

        clock.advance(2 * MINUTE_MS);
        assert_eq!(issuer.verify(&session.token), Err(SessionError::Expired));
    }
}
