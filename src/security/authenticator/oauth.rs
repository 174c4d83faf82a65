//! Delegated bearer tokens validated by an external introspection endpoint.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use url::Url;

use super::{load_user, AuthOutcome, Authenticated, Authenticator, OAUTH};
use crate::security::{
    error::AuthenticationError,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::TokenMetadata,
    user::{AccountStatusChecker, UserProvider},
};

/// Result of asking the authorization server about a token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Introspection {
    pub active: bool,
    pub subject: Option<String>,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("introspection request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("introspection endpoint returned {0}")]
    Status(reqwest::StatusCode),
    #[error("no tokio runtime available for introspection")]
    NoRuntime,
}

pub trait TokenIntrospector: Send + Sync {
    /// # Errors
    /// Returns an error when the authorization server cannot be asked.
    fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError>;
}

/// RFC 7662 response body.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    sub: Option<String>,
    username: Option<String>,
    client_id: Option<String>,
    scope: Option<String>,
}

impl From<IntrospectionResponse> for Introspection {
    fn from(response: IntrospectionResponse) -> Self {
        Self {
            active: response.active,
            subject: response.sub.or(response.username),
            client_id: response.client_id,
            scopes: response
                .scope
                .unwrap_or_default()
                .split_whitespace()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Introspects tokens over HTTP.
///
/// The security kernel is synchronous and runs on a blocking thread, so the
/// request is driven through the runtime handle captured at construction.
pub struct HttpTokenIntrospector {
    client: Client,
    endpoint: Url,
    client_id: String,
    client_secret: SecretString,
    runtime: Handle,
}

impl HttpTokenIntrospector {
    /// `timeout` bounds the whole exchange, so a stalled endpoint cannot hold
    /// the blocking thread.
    ///
    /// # Errors
    /// Returns an error if there is no current tokio runtime or the HTTP
    /// client cannot be built.
    pub fn new(
        endpoint: Url,
        client_id: impl Into<String>,
        client_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self, IntrospectionError> {
        let runtime = Handle::try_current().map_err(|_| IntrospectionError::NoRuntime)?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            client_id: client_id.into(),
            client_secret,
            runtime,
        })
    }

    async fn request(&self, token: &str) -> Result<Introspection, IntrospectionError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IntrospectionError::Status(status));
        }
        let body: IntrospectionResponse = response.json().await?;
        Ok(body.into())
    }
}

impl TokenIntrospector for HttpTokenIntrospector {
    fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError> {
        debug!(endpoint = %self.endpoint, "Introspecting delegated token");
        self.runtime.block_on(self.request(token))
    }
}

/// Fixed token table, for fixtures and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenIntrospector {
    tokens: HashMap<String, Introspection>,
}

impl StaticTokenIntrospector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, introspection: Introspection) -> Self {
        self.tokens.insert(token.into(), introspection);
        self
    }
}

impl TokenIntrospector for StaticTokenIntrospector {
    fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError> {
        Ok(self.tokens.get(token).cloned().unwrap_or_default())
    }
}

pub struct OAuthAuthenticator {
    introspector: Arc<dyn TokenIntrospector>,
    provider: Arc<dyn UserProvider>,
    status_checker: Arc<dyn AccountStatusChecker>,
}

impl OAuthAuthenticator {
    #[must_use]
    pub fn new(
        introspector: Arc<dyn TokenIntrospector>,
        provider: Arc<dyn UserProvider>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            introspector,
            provider,
            status_checker,
        }
    }

    fn bearer(request: &SecurityRequest) -> Option<&str> {
        request
            .header("authorization")?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    fn verify(&self, request: &SecurityRequest) -> Result<Authenticated, AuthenticationError> {
        let token = Self::bearer(request).ok_or(AuthenticationError::MalformedToken)?;
        let introspection = self.introspector.introspect(token).map_err(|err| {
            warn!("Token introspection failed: {err}");
            AuthenticationError::IntrospectionFailed
        })?;
        if !introspection.active {
            return Err(AuthenticationError::InactiveToken);
        }
        let subject = introspection
            .subject
            .ok_or(AuthenticationError::InactiveToken)?;
        let user = load_user(
            self.provider.as_ref(),
            &subject,
            AuthenticationError::InactiveToken,
        )?;
        self.status_checker.check_pre_auth(&user)?;
        self.status_checker.check_post_auth(&user)?;

        info!(
            target: "gatehouse::audit",
            client_id = introspection.client_id.as_deref().unwrap_or("-"),
            scopes = %introspection.scopes.join(" "),
            user = %user.identifier,
            "Delegated token accepted"
        );

        Ok(Authenticated {
            user,
            provider: self.provider.name().to_string(),
            metadata: TokenMetadata::Delegated {
                client_id: introspection.client_id,
                scopes: introspection.scopes,
            },
        })
    }
}

impl Authenticator for OAuthAuthenticator {
    fn name(&self) -> &str {
        OAUTH
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        Self::bearer(request).is_some()
    }

    fn authenticate(&self, request: &SecurityRequest, _session: &mut dyn Session) -> AuthOutcome {
        match self.verify(request) {
            Ok(authenticated) => AuthOutcome::Success(authenticated),
            Err(err) => AuthOutcome::Failure(err),
        }
    }

    fn unauthorized_response(
        &self,
        _request: &SecurityRequest,
        error: &AuthenticationError,
    ) -> SecurityResponse {
        let challenge = match error {
            AuthenticationError::InactiveToken | AuthenticationError::MalformedToken => {
                "Bearer error=\"invalid_token\""
            }
            _ => "Bearer",
        };
        SecurityResponse::unauthorized(error.to_string(), Some(challenge.to_string()))
    }

    fn challenge(&self) -> Option<String> {
        Some("Bearer".to_string())
    }
}
