//! Authenticated principals.
//!
//! A token is either fully authenticated or pending a second factor. Only the
//! former satisfies access control; callers check [`Token::is_fully_authenticated`]
//! instead of inspecting variants.

use serde::{Deserialize, Serialize};

use super::user::User;

/// Reference to a user in a named provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub identifier: String,
    pub provider: String,
}

/// Strategy specific data attached to a token.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenMetadata {
    #[default]
    None,
    Jwt {
        claims: serde_json::Value,
    },
    Delegated {
        client_id: Option<String>,
        scopes: Vec<String>,
    },
    RememberMe,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user: UserRef,
    pub firewall: String,
    pub roles: Vec<String>,
    pub strategy: String,
    #[serde(default)]
    pub metadata: TokenMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Token {
    Authenticated(Principal),
    TwoFactorPending(Principal),
}

impl Token {
    #[must_use]
    pub fn authenticated(
        user: &User,
        provider: &str,
        firewall: &str,
        strategy: &str,
        metadata: TokenMetadata,
    ) -> Self {
        Self::Authenticated(Principal::new(user, provider, firewall, strategy, metadata))
    }

    #[must_use]
    pub fn pending(user: &User, provider: &str, firewall: &str, strategy: &str) -> Self {
        Self::TwoFactorPending(Principal::new(
            user,
            provider,
            firewall,
            strategy,
            TokenMetadata::None,
        ))
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        match self {
            Self::Authenticated(principal) | Self::TwoFactorPending(principal) => principal,
        }
    }

    #[must_use]
    pub fn user(&self) -> &UserRef {
        &self.principal().user
    }

    #[must_use]
    pub fn firewall(&self) -> &str {
        &self.principal().firewall
    }

    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.principal().roles
    }

    #[must_use]
    pub fn is_fully_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::TwoFactorPending(_))
    }

    /// Promote a pending token once the second factor is verified.
    #[must_use]
    pub fn complete(self) -> Self {
        match self {
            Self::TwoFactorPending(principal) | Self::Authenticated(principal) => {
                Self::Authenticated(principal)
            }
        }
    }

    /// Copy of this token with roles taken from a freshly loaded user.
    #[must_use]
    pub fn refreshed(&self, user: &User) -> Self {
        let mut token = self.clone();
        match &mut token {
            Self::Authenticated(principal) | Self::TwoFactorPending(principal) => {
                principal.roles.clone_from(&user.roles);
            }
        }
        token
    }
}

impl Principal {
    fn new(
        user: &User,
        provider: &str,
        firewall: &str,
        strategy: &str,
        metadata: TokenMetadata,
    ) -> Self {
        Self {
            user: UserRef {
                identifier: user.identifier.clone(),
                provider: provider.to_string(),
            },
            firewall: firewall.to_string(),
            roles: user.roles.clone(),
            strategy: strategy.to_string(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Token, TokenMetadata};
    use crate::security::user::User;

    fn alice() -> User {
        User::new("alice").with_roles(&["ROLE_USER"])
    }

    #[test]
    fn pending_tokens_are_not_fully_authenticated() {
        let token = Token::pending(&alice(), "memory", "main", "form_login");
        assert!(token.is_pending());
        assert!(!token.is_fully_authenticated());
        let token = token.complete();
        assert!(token.is_fully_authenticated());
        assert_eq!(token.firewall(), "main");
    }

    #[test]
    fn refreshed_picks_up_new_roles() {
        let token = Token::authenticated(&alice(), "memory", "main", "http_basic", TokenMetadata::None);
        let promoted = alice().with_roles(&["ROLE_USER", "ROLE_ADMIN"]);
        let token = token.refreshed(&promoted);
        assert_eq!(token.roles(), ["ROLE_USER", "ROLE_ADMIN"]);
    }

    #[test]
    fn serialized_form_is_tagged() -> anyhow::Result<()> {
        let token = Token::authenticated(
            &alice(),
            "memory",
            "api",
            "oauth",
            TokenMetadata::Delegated {
                client_id: Some("cli".into()),
                scopes: vec!["read".into()],
            },
        );
        let value = serde_json::to_value(&token)?;
        assert_eq!(value["state"], "authenticated");
        assert_eq!(value["metadata"]["kind"], "delegated");
        let back: Token = serde_json::from_value(value)?;
        assert_eq!(back, token);
        Ok(())
    }
}
