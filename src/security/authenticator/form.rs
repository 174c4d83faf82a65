//! Browser login form.
//!
//! Flow:
//! 1) Reject a missing or invalid CSRF token before anything else.
//! 2) Refuse locked identifier+address pairs.
//! 3) Run the pre-auth status check, verify the password, run the post-auth check.
//! 4) Record the outcome with the brute-force guard.
//! 5) Ask for a second factor when the account has one enabled.

use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::{
    load_user, remember_me::RememberMeServices, AuthOutcome, Authenticated, Authenticator,
    FORM_LOGIN,
};
use crate::security::{
    brute_force::{ensure_not_locked, register_failure, register_success, BruteForceGuard},
    csrf::CsrfTokenManager,
    error::{AuthenticationError, SecurityError},
    firewall::FirewallZone,
    password::verify_optional_password,
    request::SecurityRequest,
    response::SecurityResponse,
    session::{target_path_key, Session, LAST_USERNAME_KEY},
    token::{Token, TokenMetadata},
    user::{AccountStatusChecker, UserProvider},
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormLoginSettings {
    pub check_path: String,
    pub username_parameter: String,
    pub password_parameter: String,
    pub csrf_parameter: String,
    pub csrf_token_id: String,
    pub enable_csrf: bool,
    pub remember_me_parameter: String,
}

impl Default for FormLoginSettings {
    fn default() -> Self {
        Self {
            check_path: "/login".to_string(),
            username_parameter: "_username".to_string(),
            password_parameter: "_password".to_string(),
            csrf_parameter: "_csrf_token".to_string(),
            csrf_token_id: crate::security::csrf::AUTHENTICATE_TOKEN_ID.to_string(),
            enable_csrf: true,
            remember_me_parameter: "_remember_me".to_string(),
        }
    }
}

pub struct FormLoginAuthenticator {
    zone: String,
    entry_point: String,
    default_target_path: String,
    two_factor_form_path: String,
    settings: FormLoginSettings,
    provider: Arc<dyn UserProvider>,
    guard: Arc<dyn BruteForceGuard>,
    status_checker: Arc<dyn AccountStatusChecker>,
    remember_me: Option<Arc<RememberMeServices>>,
}

impl FormLoginAuthenticator {
    #[must_use]
    pub fn new(
        zone: &FirewallZone,
        settings: FormLoginSettings,
        provider: Arc<dyn UserProvider>,
        guard: Arc<dyn BruteForceGuard>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            zone: zone.name.clone(),
            entry_point: zone
                .entry_point
                .clone()
                .unwrap_or_else(|| settings.check_path.clone()),
            default_target_path: zone.default_target_path.clone(),
            two_factor_form_path: zone.two_factor.form_path.clone(),
            settings,
            provider,
            guard,
            status_checker,
            remember_me: None,
        }
    }

    /// Issue remember-me cookies when the login form opts in.
    #[must_use]
    pub fn with_remember_me(mut self, services: Option<Arc<RememberMeServices>>) -> Self {
        self.remember_me = services;
        self
    }

    fn wants_remember_me(&self, request: &SecurityRequest) -> bool {
        request
            .parameter(&self.settings.remember_me_parameter)
            .is_some_and(|value| matches!(value, "1" | "true" | "on" | "yes"))
    }

    fn verify(
        &self,
        request: &SecurityRequest,
        session: &mut dyn Session,
    ) -> Result<AuthOutcome, AuthenticationError> {
        if self.settings.enable_csrf
            && !CsrfTokenManager::is_valid(
                session,
                &self.settings.csrf_token_id,
                request.parameter(&self.settings.csrf_parameter),
            )
        {
            return Err(AuthenticationError::InvalidCsrfToken);
        }

        let identifier = request
            .parameter(&self.settings.username_parameter)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let password = request
            .parameter(&self.settings.password_parameter)
            .unwrap_or_default();
        session.set(LAST_USERNAME_KEY, identifier.clone());
        if identifier.is_empty() || password.is_empty() {
            return Err(AuthenticationError::BadCredentials);
        }

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
                let _ = verify_optional_password(password, None);
                if err.counts_as_attempt() {
                    register_failure(self.guard.as_ref(), &identifier, addr)?;
                }
                return Err(err);
            }
        };

        self.status_checker.check_pre_auth(&user)?;
        let valid = verify_optional_password(password, user.password_hash.as_deref());
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

impl Authenticator for FormLoginAuthenticator {
    fn name(&self) -> &str {
        FORM_LOGIN
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        *request.method() == axum::http::Method::POST && request.path() == self.settings.check_path
    }

    fn authenticate(&self, request: &SecurityRequest, session: &mut dyn Session) -> AuthOutcome {
        self.verify(request, session)
            .unwrap_or_else(AuthOutcome::Failure)
    }

    fn on_success(
        &self,
        request: &SecurityRequest,
        session: &mut dyn Session,
        token: &Token,
    ) -> Result<Option<SecurityResponse>, SecurityError> {
        session.remove(LAST_USERNAME_KEY);
        CsrfTokenManager::remove(session, &self.settings.csrf_token_id);
        let target = session
            .remove(&target_path_key(&self.zone))
            .filter(|path| path.starts_with('/') && !path.starts_with("//"))
            .unwrap_or_else(|| self.default_target_path.clone());
        let mut response = SecurityResponse::see_other(target);

        if let Some(services) = &self.remember_me {
            if self.wants_remember_me(request) {
                match services.set_cookie(&token.user().identifier) {
                    Ok(cookie) => response = response.with_cookie(cookie),
                    Err(err) => warn!("Failed to issue remember-me cookie: {err}"),
                }
            }
        }
        Ok(Some(response))
    }

    fn unauthorized_response(
        &self,
        _request: &SecurityRequest,
        _error: &AuthenticationError,
    ) -> SecurityResponse {
        SecurityResponse::redirect(self.entry_point.clone())
    }

    fn step_up_response(&self, _request: &SecurityRequest) -> SecurityResponse {
        SecurityResponse::redirect(self.two_factor_form_path.clone())
    }
}
