//! Credential verification strategies.
//!
//! Each strategy answers four questions: does the request carry my kind of
//! credential, is it valid, what token does a success produce, and what does
//! the caller see on failure. Zones list strategies by name; the
//! [`AuthenticatorRegistry`] turns names into instances for a zone.

mod api_key;
mod basic;
mod form;
mod jwt;
mod oauth;
mod remember_me;

pub use self::api_key::{ApiKeyAuthenticator, ApiKeySettings};
pub use self::basic::BasicAuthenticator;
pub use self::form::{FormLoginAuthenticator, FormLoginSettings};
pub use self::jwt::{JwtAuthenticator, JwtCodec};
pub use self::oauth::{
    HttpTokenIntrospector, Introspection, IntrospectionError, OAuthAuthenticator,
    StaticTokenIntrospector, TokenIntrospector,
};
pub use self::remember_me::{RememberMeAuthenticator, RememberMeServices};

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    error::{AuthenticationError, SecurityError},
    firewall::FirewallZone,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::{Token, TokenMetadata},
    user::{User, UserProvider, UserProviderError},
};

pub const FORM_LOGIN: &str = "form_login";
pub const HTTP_BASIC: &str = "http_basic";
pub const JWT: &str = "jwt";
pub const API_KEY: &str = "api_key";
pub const REMEMBER_ME: &str = "remember_me";
pub const OAUTH: &str = "oauth";

/// A verified user plus strategy data.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub user: User,
    pub provider: String,
    pub metadata: TokenMetadata,
}

#[derive(Clone, Debug)]
pub enum AuthOutcome {
    Success(Authenticated),
    /// Primary credentials are valid but the account requires a second factor.
    StepUpRequired(User),
    Failure(AuthenticationError),
}

pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, request: &SecurityRequest) -> bool;

    fn authenticate(&self, request: &SecurityRequest, session: &mut dyn Session) -> AuthOutcome;

    fn create_token(&self, authenticated: &Authenticated, firewall: &str) -> Token {
        Token::authenticated(
            &authenticated.user,
            &authenticated.provider,
            firewall,
            self.name(),
            authenticated.metadata.clone(),
        )
    }

    /// Response to send instead of delegating after a success, if any.
    ///
    /// # Errors
    /// Returns an error if the response cannot be built.
    fn on_success(
        &self,
        _request: &SecurityRequest,
        _session: &mut dyn Session,
        _token: &Token,
    ) -> Result<Option<SecurityResponse>, SecurityError> {
        Ok(None)
    }

    fn unauthorized_response(
        &self,
        request: &SecurityRequest,
        error: &AuthenticationError,
    ) -> SecurityResponse;

    fn step_up_response(&self, _request: &SecurityRequest) -> SecurityResponse {
        SecurityResponse::unauthorized("Two-factor authentication is required.", self.challenge())
    }

    /// `WWW-Authenticate` value advertised when nothing was presented.
    fn challenge(&self) -> Option<String> {
        None
    }

    /// Cookies to clear on logout.
    fn logout_cookies(&self) -> Vec<String> {
        Vec::new()
    }
}

pub type AuthenticatorFactory =
    Arc<dyn Fn(&FirewallZone) -> Arc<dyn Authenticator> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AuthenticatorRegistry {
    factories: HashMap<String, AuthenticatorFactory>,
}

impl AuthenticatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&FirewallZone) -> Arc<dyn Authenticator> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    #[must_use]
    pub fn create(&self, name: &str, zone: &FirewallZone) -> Option<Arc<dyn Authenticator>> {
        self.factories.get(name).map(|factory| factory(zone))
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Map provider lookups onto credential errors.
///
/// Unknown users look exactly like wrong passwords to the caller.
pub(crate) fn load_user(
    provider: &dyn UserProvider,
    identifier: &str,
    not_found: AuthenticationError,
) -> Result<User, AuthenticationError> {
    provider.load_user(identifier).map_err(|err| match err {
        UserProviderError::NotFound | UserProviderError::Unsupported(_) => not_found,
        UserProviderError::Backend(reason) => {
            tracing::error!("User provider failure: {reason}");
            AuthenticationError::ServiceUnavailable
        }
    })
}
