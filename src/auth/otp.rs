//! Keyed OTP digests.
//!
//! The server never stores an issued code. It hands the client a digest of
//! `(email, code, bucket)` keyed with the server secret and recomputes it when
//! the code comes back.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::fmt;

use super::time_step::TimeBucket;

type HmacSha256 = Hmac<Sha256>;

/// Number of digits in an OTP code.
pub const CODE_LEN: usize = 6;

/// Length of an [`OtpDigest`] in bytes.
pub const DIGEST_LEN: usize = 32;

/// Errors constructing an [`OtpHasher`].
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("OTP secret must not be empty")]
    EmptySecret,
}

/// Server-held secret, provisioned once at startup.
#[derive(Clone)]
pub struct ServerSecret(Vec<u8>);

impl ServerSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerSecret([redacted; {} bytes])", self.0.len())
    }
}

/// How the bucket value is mixed into the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketEncoding {
    /// All 8 bytes of the bucket, big-endian.
    #[default]
    FullWidth,
    /// Only the low byte of the bucket. Collapses the time dimension so a
    /// digest repeats every 8 buckets. Kept to verify digests issued by older
    /// servers.
    LegacyLowByte,
}

/// Fixed-length keyed digest of an OTP.
#[derive(Clone)]
pub struct OtpDigest([u8; DIGEST_LEN]);

impl OtpDigest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for OtpDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for OtpDigest {}

impl fmt::Debug for OtpDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OtpDigest({})", self.to_hex())
    }
}

/// Computes and checks OTP digests with the server secret.
#[derive(Clone)]
pub struct OtpHasher {
    keyed: HmacSha256,
    encoding: BucketEncoding,
}

impl OtpHasher {
    pub fn new(secret: &ServerSecret) -> Result<Self, OtpError> {
        Self::with_encoding(secret, BucketEncoding::default())
    }

    pub fn with_encoding(secret: &ServerSecret, encoding: BucketEncoding) -> Result<Self, OtpError> {
        if secret.is_empty() {
            return Err(OtpError::EmptySecret);
        }
        // HMAC accepts keys of any length.
        let keyed =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| OtpError::EmptySecret)?;
        Ok(Self { keyed, encoding })
    }

    pub fn encoding(&self) -> BucketEncoding {
        self.encoding
    }

    fn mac(&self, email: &str, code: &str, bucket: TimeBucket) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(email.as_bytes());
        mac.update(code.as_bytes());
        match self.encoding {
            BucketEncoding::FullWidth => mac.update(&bucket.millis().to_be_bytes()),
            BucketEncoding::LegacyLowByte => mac.update(&[bucket.millis() as u8]),
        }
        mac
    }

    /// Digest of `(email, code, bucket)`.
    pub fn digest(&self, email: &str, code: &str, bucket: TimeBucket) -> OtpDigest {
        let out = self.mac(email, code, bucket).finalize().into_bytes();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&out);
        OtpDigest(bytes)
    }

    /// Constant-time check of `claimed` against the digest for the inputs.
    pub fn verify(&self, email: &str, code: &str, bucket: TimeBucket, claimed: &[u8]) -> bool {
        self.mac(email, code, bucket).verify_slice(claimed).is_ok()
    }
}

impl fmt::Debug for OtpHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpHasher")
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Generates a random numeric code of [`CODE_LEN`] digits.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// True if `code` is exactly [`CODE_LEN`] ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
