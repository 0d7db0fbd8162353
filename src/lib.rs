//! Pantree API server library.
//!
//! Passwordless OTP login, signed session tokens, and last-write-wins sync of
//! a user's pantry items between devices and the server.

pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod models;
pub mod server;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::ApiError;
