//! Credential verification used by login flows.
//!
//! The [`CredentialStore`] is the boundary to whatever holds user accounts.
//! [`StaticCredentialStore`] keeps a fixed user list in memory, loaded from
//! JSON:
//!
//! ```json
//! [
//!   {"user_id": 1, "username": "alice", "password": "s3cret",
//!    "user_level": 5, "roles": ["admin"], "email": "alice@example.com"}
//! ]
//! ```
//!
//! `password` is either plain text, hashed with Argon2id on load, or an
//! existing Argon2 PHC string (`$argon2id$...`), kept as is.

use std::collections::HashMap;
use std::path::Path;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;

const INVALID_LOGIN: &str = "invalid username or password";

/// Verifies username/password pairs and describes the matching identity.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the identity for a matching pair, or
    /// [`SecurityError::InvalidCredentials`] carrying the store's message.
    async fn verify(&self, username: &str, password: &str) -> SecurityResult<IdentityContext>;
}

/// One account as written in a users file.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: String,
    /// Plain text or an Argon2 PHC string.
    pub password: String,
    #[serde(default)]
    pub user_level: i32,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
}

struct StoredUser {
    /// Argon2 PHC string.
    password_hash: String,
    identity: IdentityContext,
}

/// Hash a password into a salted Argon2id PHC string.
pub fn hash_password(password: &str) -> SecurityResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SecurityError::Configuration(format!("cannot hash password: {}", e)))
}

fn is_phc_hash(password: &str) -> bool {
    password.starts_with("$argon2")
}

/// In-memory credential store. Only salted password hashes are retained.
pub struct StaticCredentialStore {
    users: HashMap<String, StoredUser>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Build from account records, hashing each plain text password.
    pub fn from_records(records: Vec<UserRecord>) -> SecurityResult<Self> {
        let mut store = Self::new();
        for record in records {
            store.add_user(record)?;
        }
        Ok(store)
    }

    /// Parse a JSON array of [`UserRecord`]s.
    pub fn from_json(json: &str) -> SecurityResult<Self> {
        let records: Vec<UserRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    /// Load a JSON users file.
    pub fn from_file(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SecurityError::Configuration(format!("cannot read users file {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Register or replace an account.
    ///
    /// A malformed PHC string is a [`SecurityError::Configuration`].
    pub fn add_user(&mut self, record: UserRecord) -> SecurityResult<()> {
        let password_hash = if is_phc_hash(&record.password) {
            let parsed = PasswordHash::new(&record.password).map_err(|e| {
                SecurityError::Configuration(format!(
                    "malformed password hash for {}: {}",
                    record.username, e
                ))
            })?;
            if parsed.hash.is_none() {
                return Err(SecurityError::Configuration(format!(
                    "password hash for {} has no output",
                    record.username
                )));
            }
            record.password
        } else {
            hash_password(&record.password)?
        };

        let mut builder = IdentityContext::builder(record.user_id)
            .user_name(record.username.clone())
            .user_level(record.user_level)
            .roles(record.roles);
        if let Some(email) = record.email {
            builder = builder.email(email);
        }

        self.users.insert(
            record.username,
            StoredUser {
                password_hash,
                identity: builder.build(),
            },
        );
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for StaticCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> SecurityResult<IdentityContext> {
        let Some(user) = self.users.get(username) else {
            return Err(SecurityError::InvalidCredentials(INVALID_LOGIN.to_string()));
        };
        let matches = PasswordHash::new(&user.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        if matches {
            Ok(user.identity.clone())
        } else {
            Err(SecurityError::InvalidCredentials(INVALID_LOGIN.to_string()))
        }
    }
}
