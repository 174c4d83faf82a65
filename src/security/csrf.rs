//! Per-purpose CSRF tokens kept in the session.

use super::{
    error::SessionError,
    session::Session,
    utils::{constant_time_eq, generate_token},
};

/// Token id used by form login.
pub const AUTHENTICATE_TOKEN_ID: &str = "authenticate";

/// Token id guarding logout of `zone`.
#[must_use]
pub fn logout_token_id(zone: &str) -> String {
    format!("logout_{zone}")
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CsrfTokenManager;

impl CsrfTokenManager {
    fn key(id: &str) -> String {
        format!("_csrf/{id}")
    }

    /// Return the token for `id`, creating one on first use.
    ///
    /// # Errors
    /// Returns an error if a new token cannot be generated.
    pub fn token(session: &mut dyn Session, id: &str) -> Result<String, SessionError> {
        let key = Self::key(id);
        if let Some(existing) = session.get(&key) {
            return Ok(existing.to_string());
        }
        let token = generate_token()?;
        session.set(&key, token.clone());
        Ok(token)
    }

    #[must_use]
    pub fn is_valid(session: &dyn Session, id: &str, candidate: Option<&str>) -> bool {
        match (session.get(&Self::key(id)), candidate) {
            (Some(expected), Some(candidate)) if !candidate.is_empty() => {
                constant_time_eq(expected, candidate)
            }
            _ => false,
        }
    }

    pub fn remove(session: &mut dyn Session, id: &str) {
        session.remove(&Self::key(id));
    }
}

#[cfg(test)]
mod tests {
    use super::{logout_token_id, CsrfTokenManager, AUTHENTICATE_TOKEN_ID};
    use crate::security::session::{MemorySession, Session};

    #[test]
    fn token_is_stable_within_session() -> anyhow::Result<()> {
        let mut session = MemorySession::new();
        let first = CsrfTokenManager::token(&mut session, AUTHENTICATE_TOKEN_ID)?;
        let second = CsrfTokenManager::token(&mut session, AUTHENTICATE_TOKEN_ID)?;
        assert_eq!(first, second);
        assert!(session.has("_csrf/authenticate"));
        Ok(())
    }

    #[test]
    fn validation_requires_matching_token() -> anyhow::Result<()> {
        let mut session = MemorySession::new();
        let token = CsrfTokenManager::token(&mut session, &logout_token_id("main"))?;
        assert!(session.has("_csrf/logout_main"));
        assert!(CsrfTokenManager::is_valid(&session, "logout_main", Some(&token)));
        assert!(!CsrfTokenManager::is_valid(&session, "logout_main", Some("forged")));
        assert!(!CsrfTokenManager::is_valid(&session, "logout_main", None));
        assert!(!CsrfTokenManager::is_valid(&session, "logout_api", Some(&token)));
        Ok(())
    }

    #[test]
    fn missing_session_token_never_validates() {
        let session = MemorySession::new();
        assert!(!CsrfTokenManager::is_valid(&session, AUTHENTICATE_TOKEN_ID, Some("")));
    }
}
