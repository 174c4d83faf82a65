//! Users, user providers and account status checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::{error::AuthenticationError, token::UserRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
    Locked,
    Expired,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Locked => "locked",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identifier: String,
    /// Argon2 PHC string.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Base32 TOTP secret.
    #[serde(default)]
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub status: AccountStatus,
}

// Keep secrets out of logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("identifier", &self.identifier)
            .field("roles", &self.roles)
            .field("two_factor_enabled", &self.two_factor_enabled)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl User {
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password_hash: None,
            roles: Vec::new(),
            totp_secret: None,
            two_factor_enabled: false,
            status: AccountStatus::Active,
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    /// Set a TOTP secret and enable two-factor authentication.
    #[must_use]
    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.totp_secret = Some(secret.into());
        self.two_factor_enabled = true;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn requires_two_factor(&self) -> bool {
        self.two_factor_enabled && self.totp_secret.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserProviderError {
    #[error("user not found")]
    NotFound,
    #[error("user from provider '{0}' is not supported")]
    Unsupported(String),
    #[error("user provider failure: {0}")]
    Backend(String),
}

pub trait UserProvider: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// Returns `NotFound` when no user has this identifier.
    fn load_user(&self, identifier: &str) -> Result<User, UserProviderError>;

    /// Reload a user referenced by a stored token.
    ///
    /// # Errors
    /// Returns `Unsupported` when the reference belongs to another provider.
    fn refresh_user(&self, user: &UserRef) -> Result<User, UserProviderError> {
        if user.provider != self.name() {
            return Err(UserProviderError::Unsupported(user.provider.clone()));
        }
        self.load_user(&user.identifier)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryUserProvider {
    users: HashMap<String, User>,
}

impl InMemoryUserProvider {
    pub const NAME: &'static str = "memory";

    #[must_use]
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|user| (user.identifier.clone(), user))
                .collect(),
        }
    }

    /// Load users from a JSON array.
    ///
    /// # Errors
    /// Returns an error if the document is not a list of users.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let users: Vec<User> = serde_json::from_str(json)?;
        Ok(Self::new(users))
    }

    pub fn insert(&mut self, user: User) {
        self.users.insert(user.identifier.clone(), user);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserProvider for InMemoryUserProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn load_user(&self, identifier: &str) -> Result<User, UserProviderError> {
        self.users
            .get(identifier)
            .cloned()
            .ok_or(UserProviderError::NotFound)
    }
}

/// Hooks run around credential verification.
pub trait AccountStatusChecker: Send + Sync {
    /// # Errors
    /// Returns an error when the account may not attempt authentication.
    fn check_pre_auth(&self, user: &User) -> Result<(), AuthenticationError>;

    /// # Errors
    /// Returns an error when the account may not complete authentication.
    fn check_post_auth(&self, user: &User) -> Result<(), AuthenticationError>;
}

/// Suspended and locked accounts are refused before the password is checked,
/// expired accounts only after it.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultAccountStatusChecker;

impl AccountStatusChecker for DefaultAccountStatusChecker {
    fn check_pre_auth(&self, user: &User) -> Result<(), AuthenticationError> {
        match user.status {
            AccountStatus::Suspended | AccountStatus::Locked => {
                Err(AuthenticationError::AccountStatus(user.status.to_string()))
            }
            AccountStatus::Active | AccountStatus::Expired => Ok(()),
        }
    }

    fn check_post_auth(&self, user: &User) -> Result<(), AuthenticationError> {
        if user.status == AccountStatus::Expired {
            return Err(AuthenticationError::AccountStatus(user.status.to_string()));
        }
        Ok(())
    }
}
