//! services/api/src/security/mod.rs
//!
//! Signed action tokens and reversible email storage. Both are keyed off the
//! single `ENCRYPTION_KEY` secret, with per-concern derivation.

pub mod cipher;
pub mod tokens;

pub use cipher::EmailCipher;
pub use tokens::{TokenCodec, TokenPurpose};
