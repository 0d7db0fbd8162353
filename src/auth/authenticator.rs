//! Passwordless login with time-windowed OTPs.
//!
//! # Flow
//!
//! 1. `issue` picks a random code and returns its digest for the bucket
//!    `WINDOW - 1` steps ahead. The code goes to the user by email, the digest
//!    goes back to the client.
//! 2. `authenticate` receives `(email, code, digest)`, recomputes the digest
//!    for the current bucket and the next `WINDOW - 1` buckets and accepts on
//!    the first match.
//! 3. The user is looked up by email and created on first login.
//!
//! A code issued in bucket `B` therefore verifies from `B` through `B + 4`.

use std::sync::Arc;

use super::ledger::ConsumedOtpLedger;
use super::otp::{self, OtpDigest, OtpHasher};
use super::time_step::{current_bucket, Clock};
use crate::models::{Identity, ProfileDefaults};
use crate::store::{IdentityStore, StoreError};

/// Number of buckets checked on verification, starting at the current one.
pub const WINDOW: i64 = 5;

/// Login failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad code length, non-hex digest, or unusable email. Resubmit.
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// No bucket in the window matched. Request a new OTP.
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Could not resolve identity: {0}")]
    IdentityResolutionFailed(#[source] StoreError),
}

/// A freshly issued OTP.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub email: String,
    pub code: String,
    pub digest: OtpDigest,
    /// First instant (epoch millis) at which the code no longer verifies.
    pub expires_at_ms: i64,
}

/// Issues and verifies OTPs, resolving identities on success.
pub struct OtpAuthenticator {
    hasher: OtpHasher,
    clock: Arc<dyn Clock>,
    identities: Arc<dyn IdentityStore>,
    defaults: ProfileDefaults,
    ledger: Option<Arc<ConsumedOtpLedger>>,
}

impl OtpAuthenticator {
    pub fn new(hasher: OtpHasher, clock: Arc<dyn Clock>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            hasher,
            clock,
            identities,
            defaults: ProfileDefaults::default(),
            ledger: None,
        }
    }

    /// Rejects a second redemption of the same digest while it is valid.
    pub fn with_ledger(mut self, ledger: Arc<ConsumedOtpLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_defaults(mut self, defaults: ProfileDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn ledger(&self) -> Option<&Arc<ConsumedOtpLedger>> {
        self.ledger.as_ref()
    }

    /// Generates a code for `email` and its digest.
    pub fn issue(&self, email: &str) -> Result<IssuedOtp, AuthError> {
        self.issue_with_code(email, &otp::generate_code())
    }

    /// Digest for a caller-chosen code.
    pub fn issue_with_code(&self, email: &str, code: &str) -> Result<IssuedOtp, AuthError> {
        let email = normalize_email(email)?;
        validate_code(code)?;

        let bucket = current_bucket(self.clock.as_ref(), WINDOW - 1);
        let digest = self.hasher.digest(&email, code, bucket);

        Ok(IssuedOtp {
            email,
            code: code.to_string(),
            digest,
            expires_at_ms: bucket.next().millis(),
        })
    }

    /// Offset of the first bucket in the window whose digest matches.
    fn matching_offset(&self, email: &str, code: &str, claimed: &[u8]) -> Option<i64> {
        (0..WINDOW).find(|&offset| {
            let bucket = current_bucket(self.clock.as_ref(), offset);
            self.hasher.verify(email, code, bucket, claimed)
        })
    }

    /// Verifies `code` against `claimed_digest_hex` and resolves the user.
    pub async fn authenticate(
        &self,
        email: &str,
        code: &str,
        claimed_digest_hex: &str,
    ) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        validate_code(code)?;
        let claimed = hex::decode(claimed_digest_hex.trim())
            .map_err(|e| AuthError::MalformedInput(format!("digest is not hex: {}", e)))?;

        let offset = match self.matching_offset(&email, code, &claimed) {
            Some(offset) => offset,
            None => {
                tracing::info!("OTP rejected for {}", email);
                return Err(AuthError::AuthenticationFailed);
            }
        };

        // A code is only spent once the identity resolves.
        let identity = self.resolve_identity(&email).await?;

        if let Some(ledger) = &self.ledger {
            let now = self.clock.now_millis();
            let expires = current_bucket(self.clock.as_ref(), offset).next().millis();
            if !ledger.consume(&email, claimed_digest_hex.trim(), now, expires) {
                tracing::warn!("OTP replay rejected for {}", email);
                return Err(AuthError::AuthenticationFailed);
            }
        }

        tracing::debug!("OTP accepted for {} at offset {}", email, offset);
        Ok(identity)
    }

    /// Looks up the user by email, creating one on first login.
    async fn resolve_identity(&self, email: &str) -> Result<Identity, AuthError> {
        let existing = self
            .identities
            .find_by_email(email)
            .await
            .map_err(AuthError::IdentityResolutionFailed)?;

        if let Some(user) = existing {
            return Ok(user.id);
        }

        match self.identities.create(email, &self.defaults).await {
            Ok(user) => {
                tracing::info!("Created new user {} for {}", user.id, email);
                Ok(user.id)
            }
            Err(e) => {
                // A concurrent first login may have created the user already.
                match self.identities.find_by_email(email).await {
                    Ok(Some(user)) => Ok(user.id),
                    _ => {
                        tracing::warn!("Failed to create user {}: {}", email, e);
                        Err(AuthError::IdentityResolutionFailed(e))
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for OtpAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpAuthenticator")
            .field("hasher", &self.hasher)
            .field("single_use", &self.ledger.is_some())
            .finish()
    }
}

/// Trims and lowercases an email address.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::MalformedInput(format!(
            "invalid email address '{}'",
            email
        ))),
    }
}

fn validate_code(code: &str) -> Result<(), AuthError> {
    if otp::is_valid_code(code) {
        Ok(())
    } else {
        Err(AuthError::MalformedInput(format!(
            "code must be exactly {} digits",
            otp::CODE_LEN
        )))
    }
}
