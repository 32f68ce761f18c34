//! User accounts
//!
//! Passwords are stored as hex-encoded SHA-256 digests. Login verification
//! hashes the candidate and compares digests; the clear text is never kept.

use super::Entity;
use crate::outcome::ErrorCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hash a clear-text password for storage
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// A user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique login name
    pub username: String,
    /// Hex SHA-256 of the password
    pub password_hash: String,
    /// Expiration time in milliseconds since the Unix epoch, if any
    pub expiration: Option<u64>,
    /// Granted permission strings
    pub permissions: Vec<String>,
}

impl User {
    /// Create an account from a clear-text password
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_hash: hash_password(password),
            expiration: None,
            permissions: Vec::new(),
        }
    }

    /// Check a login attempt against the stored hash
    pub fn verify_password(&self, candidate: &str) -> bool {
        hash_password(candidate) == self.password_hash
    }

    /// True when the account has an expiration in the past
    pub fn is_expired(&self) -> bool {
        match self.expiration {
            Some(expiration) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                expiration <= now
            }
            None => false,
        }
    }
}

impl Entity for User {
    fn id(&self) -> &str {
        &self.username
    }

    fn valid(&self) -> ErrorCode {
        if self.username.is_empty()
            || self.username.len() > 64
            || !self
                .username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return ErrorCode::InvalidUsername;
        }
        ErrorCode::Ok
    }

    fn complete(&self) -> ErrorCode {
        if self.password_hash.is_empty() {
            return ErrorCode::IncompleteConfig;
        }
        ErrorCode::Ok
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn test_password_verification() {
        let user = User::new("alice", "hunter2");
        assert!(user.verify_password("hunter2"));
        assert!(!user.verify_password("hunter3"));
        assert_ne!(user.password_hash, "hunter2");
    }

    #[test]
    fn test_username_validation() {
        assert_eq!(User::new("", "pw").valid(), ErrorCode::InvalidUsername);
        assert_eq!(
            User::new("has spaces", "pw").valid(),
            ErrorCode::InvalidUsername
        );
        assert_eq!(User::new("alice_01", "pw").valid(), ErrorCode::Ok);
    }

    #[test]
    fn test_expiration() {
        let mut user = User::new("bob", "pw");
        assert!(!user.is_expired());
        user.expiration = Some(1);
        assert!(user.is_expired());
        user.expiration = Some(u64::MAX);
        assert!(!user.is_expired());
    }

    #[test]
    fn test_store_rejects_invalid() {
        let store: Store<User> = Store::ephemeral("users");
        assert!(store.add(User::new("bad name", "pw")).is_err());
        assert!(store.add(User::new("good", "pw")).is_ok());
    }
}
