//! Connection groups
//!
//! A group scopes which agents may connect and which users administer them.
//! Agents authenticate either by membership in a group or by presenting one
//! of the group's passwords; groups with no passwords accept any agent.

use super::{Entity, Store, StoreError};
use crate::outcome::ErrorCode;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use uuid::Uuid;

/// A named group of agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Stable unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Username of the owning user
    pub owner: String,
    /// Usernames with membership access
    pub members: Vec<String>,
    /// Agent authentication passwords. Empty means no authentication.
    pub passwords: Vec<String>,
}

impl Group {
    /// Create a group with a random id
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner: owner.into(),
            members: Vec::new(),
            passwords: Vec::new(),
        }
    }

    /// True when the given user owns or belongs to the group
    pub fn has_member(&self, username: &str) -> bool {
        self.owner == username || self.members.iter().any(|m| m == username)
    }
}

impl Entity for Group {
    fn id(&self) -> &str {
        &self.id
    }

    fn valid(&self) -> ErrorCode {
        if self.name.is_empty() || self.name.len() > 48 {
            return ErrorCode::InvalidGroupName;
        }
        ErrorCode::Ok
    }

    fn complete(&self) -> ErrorCode {
        if self.owner.is_empty() {
            return ErrorCode::IncompleteConfig;
        }
        ErrorCode::Ok
    }
}

/// A [`Store`] of groups with membership and authentication queries
pub struct GroupStore {
    inner: Store<Group>,
}

impl GroupStore {
    pub fn ephemeral() -> Self {
        Self {
            inner: Store::ephemeral("groups"),
        }
    }

    pub fn persistent(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            inner: Store::persistent("groups", db)?,
        })
    }

    /// Groups the given user owns or belongs to
    pub fn membership(&self, username: &str) -> Result<Vec<Group>, StoreError> {
        self.inner.find(|g| g.has_member(username))
    }

    /// Groups that accept unauthenticated agents
    pub fn unauth_groups(&self) -> Result<Vec<Group>, StoreError> {
        self.inner.find(|g| g.passwords.is_empty())
    }

    /// Groups an agent can join with the given password
    pub fn by_password(&self, password: &str) -> Result<Vec<Group>, StoreError> {
        self.inner.find(|g| g.passwords.iter().any(|p| p == password))
    }
}

impl Deref for GroupStore {
    type Target = Store<Group>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

// ============================================================================
// TESTS
// ============================================================================
