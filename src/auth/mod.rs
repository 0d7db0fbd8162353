//! Passwordless OTP login and session tokens.

pub mod authenticator;
pub mod ledger;
pub mod otp;
pub mod session;
pub mod time_step;

pub use authenticator::{normalize_email, AuthError, IssuedOtp, OtpAuthenticator, WINDOW};
pub use ledger::ConsumedOtpLedger;
pub use otp::{BucketEncoding, OtpDigest, OtpError, OtpHasher, ServerSecret};
pub use session::{SessionClaims, SessionError, SessionIssuer, SessionState, SignedSession};
pub use time_step::{current_bucket, Clock, ManualClock, SystemClock, TimeBucket, INTERVAL_MS};
