//! Active principal for the current request, with session persistence.

use tracing::warn;

use super::{
    error::SessionError,
    session::{security_key, Session, TWO_FACTOR_TOKEN_KEY},
    token::Token,
};

#[derive(Clone, Debug, Default)]
pub struct TokenStore {
    token: Option<Token>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = Some(token);
    }

    pub fn clear(&mut self) {
        self.token = None;
    }

    #[must_use]
    pub fn take(&mut self) -> Option<Token> {
        self.token.take()
    }

    /// Read the serialized token stored for `zone`.
    ///
    /// Undecodable values are dropped from the session and treated as absent.
    pub fn load(session: &mut dyn Session, zone: &str) -> Option<Token> {
        read_token(session, &security_key(zone))
    }

    /// # Errors
    /// Returns an error if the token cannot be serialized.
    pub fn save(session: &mut dyn Session, zone: &str, token: &Token) -> Result<(), SessionError> {
        session.set(&security_key(zone), serde_json::to_string(token)?);
        Ok(())
    }

    pub fn remove(session: &mut dyn Session, zone: &str) {
        session.remove(&security_key(zone));
    }

    pub fn load_pending(session: &mut dyn Session) -> Option<Token> {
        read_token(session, TWO_FACTOR_TOKEN_KEY).filter(Token::is_pending)
    }

    /// # Errors
    /// Returns an error if the token cannot be serialized.
    pub fn save_pending(session: &mut dyn Session, token: &Token) -> Result<(), SessionError> {
        session.set(TWO_FACTOR_TOKEN_KEY, serde_json::to_string(token)?);
        Ok(())
    }

    pub fn remove_pending(session: &mut dyn Session) {
        session.remove(TWO_FACTOR_TOKEN_KEY);
    }
}

fn read_token(session: &mut dyn Session, key: &str) -> Option<Token> {
    let raw = session.get(key)?;
    match serde_json::from_str::<Token>(raw) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!(session_key = key, "Discarding undecodable session token: {err}");
            session.remove(key);
            None
        }
    }
}
