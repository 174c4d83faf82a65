use base64ct::{Base64, Encoding};
use std::sync::Arc;

use super::{load_user, AuthOutcome, Authenticated, Authenticator, HTTP_BASIC};
use crate::security::{
    brute_force::{ensure_not_locked, register_failure, register_success, BruteForceGuard},
    error::AuthenticationError,
    password::verify_optional_password,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::TokenMetadata,
    user::{AccountStatusChecker, UserProvider},
};

/// `Authorization: Basic base64(identifier:password)`.
pub struct BasicAuthenticator {
    realm: String,
    provider: Arc<dyn UserProvider>,
    guard: Arc<dyn BruteForceGuard>,
    status_checker: Arc<dyn AccountStatusChecker>,
}

impl BasicAuthenticator {
    #[must_use]
    pub fn new(
        realm: impl Into<String>,
        provider: Arc<dyn UserProvider>,
        guard: Arc<dyn BruteForceGuard>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            realm: realm.into(),
            provider,
            guard,
            status_checker,
        }
    }

    fn credentials(request: &SecurityRequest) -> Option<(String, String)> {
        let encoded = request.header("authorization")?.strip_prefix("Basic ")?;
        let decoded = Base64::decode_vec(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (identifier, password) = decoded.split_once(':')?;
        if identifier.is_empty() || password.is_empty() {
            return None;
        }
        Some((identifier.to_string(), password.to_string()))
    }

    fn verify(&self, request: &SecurityRequest) -> Result<AuthOutcome, AuthenticationError> {
        let (identifier, password) =
            Self::credentials(request).ok_or(AuthenticationError::BadCredentials)?;
        let addr = request.client_addr_string();
        let addr = addr.as_deref();

        ensure_not_locked(self.guard.as_ref(), &identifier, addr)?;

        let user = match load_user(
            self.provider.as_ref(),
            &identifier,
            AuthenticationError::BadCredentials,
        ) {
            Ok(user) => user,
            Err(err) => {
                let _ = verify_optional_password(&password, None);
                if err.counts_as_attempt() {
                    register_failure(self.guard.as_ref(), &identifier, addr)?;
                }
                return Err(err);
            }
        };
        self.status_checker.check_pre_auth(&user)?;

        let valid = verify_optional_password(&password, user.password_hash.as_deref());
        if !valid {
            register_failure(self.guard.as_ref(), &identifier, addr)?;
            return Err(AuthenticationError::BadCredentials);
        }

        self.status_checker.check_post_auth(&user)?;
        register_success(self.guard.as_ref(), &identifier, addr)?;

        if user.requires_two_factor() {
            return Ok(AuthOutcome::StepUpRequired(user));
        }
        Ok(AuthOutcome::Success(Authenticated {
            user,
            provider: self.provider.name().to_string(),
            metadata: TokenMetadata::None,
        }))
    }
}

impl Authenticator for BasicAuthenticator {
    fn name(&self) -> &str {
        HTTP_BASIC
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        request
            .header("authorization")
            .is_some_and(|value| value.starts_with("Basic "))
    }

    fn authenticate(&self, request: &SecurityRequest, _session: &mut dyn Session) -> AuthOutcome {
        self.verify(request).unwrap_or_else(AuthOutcome::Failure)
    }

    fn unauthorized_response(
        &self,
        _request: &SecurityRequest,
        error: &AuthenticationError,
    ) -> SecurityResponse {
        SecurityResponse::unauthorized(error.to_string(), self.challenge())
    }

    fn challenge(&self) -> Option<String> {
        Some(format!("Basic realm=\"{}\"", self.realm))
    }
}
