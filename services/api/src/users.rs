//! services/api/src/users.rs
//!
//! Identity management: ghost users created at signup, optional claiming
//! (username + password) for credential login later. Emails are stored
//! encrypted for sending and hashed for lookup; passwords use argon2.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use dailylit_core::domain::User;
use dailylit_core::ports::{DatabaseService, PortError, PortResult};
use tracing::warn;
use uuid::Uuid;

use crate::security::EmailCipher;

/// User identity operations over the database port.
#[derive(Clone)]
pub struct UserService {
    db: Arc<dyn DatabaseService>,
    cipher: EmailCipher,
}

impl UserService {
    pub fn new(db: Arc<dyn DatabaseService>, cipher: EmailCipher) -> Self {
        Self { db, cipher }
    }

    /// Creates a ghost identity for an email address.
    ///
    /// Duplicates are rejected with `PortError::Duplicate` so the caller can
    /// branch ("already registered") instead of treating it as a hard error.
    pub async fn create(&self, email: &str, timezone: &str) -> PortResult<User> {
        let email_lookup = self.cipher.lookup_key(email);
        if self.db.get_user_by_lookup(&email_lookup).await?.is_some() {
            return Err(PortError::Duplicate("email".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email_enc: self.cipher.encrypt_email(email)?,
            email_lookup,
            username: None,
            password_hash: None,
            claimed: false,
            timezone: timezone.to_string(),
            created_at: Utc::now(),
        };
        // The unique index on email_lookup backstops the check above if two
        // signups race.
        self.db.create_user(&user).await?;
        Ok(user)
    }

    /// Finds the identity behind an email address, if one exists.
    pub async fn find_by_email(&self, email: &str) -> PortResult<Option<User>> {
        self.db
            .get_user_by_lookup(&self.cipher.lookup_key(email))
            .await
    }

    /// Upgrades a ghost identity to a login-capable one. Idempotent when the
    /// same user re-claims with the same username.
    pub async fn claim(&self, user_id: Uuid, username: &str, password: &str) -> PortResult<()> {
        if let Some(other) = self.db.get_user_by_username(username).await? {
            if other.id != user_id {
                return Err(PortError::Duplicate("username".to_string()));
            }
        }

        let user = self.db.get_user_by_id(user_id).await?;
        if user.claimed {
            if user.username.as_deref() == Some(username) {
                return Ok(());
            }
            return Err(PortError::Duplicate(
                "account is already claimed under a different username".to_string(),
            ));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PortError::Unexpected(format!("failed to hash password: {}", e)))?
            .to_string();

        self.db.claim_user(user_id, username, &password_hash).await
    }

    /// Credential check. Returns `None` uniformly whether the username is
    /// unknown or the password is wrong, so login responses carry no
    /// username-enumeration signal.
    pub async fn verify(&self, username: &str, password: &str) -> PortResult<Option<Uuid>> {
        let user = self.db.get_user_by_username(username).await?;

        let (user_id, stored_hash) = match user {
            Some(User {
                id,
                password_hash: Some(hash),
                ..
            }) => (id, hash),
            _ => {
                // Burn a comparable hashing round so unknown usernames take
                // about as long as wrong passwords.
                let salt = SaltString::generate(&mut OsRng);
                let _ = Argon2::default().hash_password(password.as_bytes(), &salt);
                return Ok(None);
            }
        };

        let parsed = match PasswordHash::new(&stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(%user_id, error = %e, "stored password hash failed to parse");
                return Ok(None);
            }
        };

        let valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        Ok(valid.then_some(user_id))
    }
}
