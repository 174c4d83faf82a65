use std::collections::HashMap;
use std::sync::Arc;

use super::{load_user, AuthOutcome, Authenticated, Authenticator, API_KEY};
use crate::security::{
    error::AuthenticationError,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::TokenMetadata,
    user::{AccountStatusChecker, UserProvider},
    utils::constant_time_eq,
};

#[derive(Clone, Default)]
pub struct ApiKeySettings {
    pub header: String,
    pub query_parameter: Option<String>,
    /// key -> user identifier
    pub keys: HashMap<String, String>,
}

/// Static API keys. Keys are long random secrets, so failures are not throttled.
pub struct ApiKeyAuthenticator {
    settings: ApiKeySettings,
    provider: Arc<dyn UserProvider>,
    status_checker: Arc<dyn AccountStatusChecker>,
}

impl ApiKeyAuthenticator {
    #[must_use]
    pub fn new(
        settings: ApiKeySettings,
        provider: Arc<dyn UserProvider>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            settings,
            provider,
            status_checker,
        }
    }

    fn presented<'r>(&self, request: &'r SecurityRequest) -> Option<&'r str> {
        request
            .header(&self.settings.header)
            .or_else(|| {
                self.settings
                    .query_parameter
                    .as_deref()
                    .and_then(|name| request.query_param(name))
            })
            .filter(|key| !key.is_empty())
    }

    /// Compare against every key so timing does not reveal which one matched.
    fn owner(&self, presented: &str) -> Option<&str> {
        let mut owner = None;
        for (key, identifier) in &self.settings.keys {
            if constant_time_eq(key, presented) && owner.is_none() {
                owner = Some(identifier.as_str());
            }
        }
        owner
    }

    fn verify(&self, request: &SecurityRequest) -> Result<Authenticated, AuthenticationError> {
        let presented = self
            .presented(request)
            .ok_or(AuthenticationError::InvalidApiKey)?;
        let identifier = self
            .owner(presented)
            .ok_or(AuthenticationError::InvalidApiKey)?;
        let user = load_user(
            self.provider.as_ref(),
            identifier,
            AuthenticationError::InvalidApiKey,
        )?;
        self.status_checker.check_pre_auth(&user)?;
        self.status_checker.check_post_auth(&user)?;
        Ok(Authenticated {
            user,
            provider: self.provider.name().to_string(),
            metadata: TokenMetadata::None,
        })
    }
}

impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &str {
        API_KEY
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        self.presented(request).is_some()
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
        SecurityResponse::unauthorized(error.to_string(), self.challenge())
    }

    fn challenge(&self) -> Option<String> {
        Some(format!("ApiKey header=\"{}\"", self.settings.header))
    }
}
