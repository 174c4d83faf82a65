//! Signed remember-me cookie.
//!
//! Cookie value: `base64(identifier:expires_at:hex(hmac_sha256(identifier:expires_at)))`.

use base64ct::{Base64, Encoding};
use hmac::{digest::InvalidLength, Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{load_user, AuthOutcome, Authenticated, Authenticator, REMEMBER_ME};
use crate::security::{
    brute_force::{Clock, SystemClock},
    error::AuthenticationError,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::TokenMetadata,
    user::{AccountStatusChecker, UserProvider},
    utils::constant_time_eq,
};

type HmacSha256 = Hmac<Sha256>;

/// Cookie issuing and verification shared by form login and the
/// remember-me strategy.
pub struct RememberMeServices {
    cookie_name: String,
    secret: SecretString,
    lifetime: Duration,
    secure: bool,
    clock: Arc<dyn Clock>,
}

impl RememberMeServices {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>, secret: SecretString, lifetime: Duration) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            secret,
            lifetime,
            secure: false,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn signature(&self, payload: &str) -> Result<String, InvalidLength> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Cookie value for `identifier`, valid for the configured lifetime.
    ///
    /// # Errors
    /// Returns an error if the HMAC key is rejected.
    pub fn generate_value(&self, identifier: &str) -> Result<String, InvalidLength> {
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        let expires_at = self.clock.now().saturating_add(lifetime);
        let payload = format!("{identifier}:{expires_at}");
        let signature = self.signature(&payload)?;
        Ok(Base64::encode_string(format!("{payload}:{signature}").as_bytes()))
    }

    /// Full `Set-Cookie` value.
    ///
    /// # Errors
    /// Returns an error if the HMAC key is rejected.
    pub fn set_cookie(&self, identifier: &str) -> Result<String, InvalidLength> {
        let value = self.generate_value(identifier)?;
        Ok(self.format_cookie(&value, self.lifetime.as_secs()))
    }

    #[must_use]
    pub fn clear_cookie(&self) -> String {
        self.format_cookie("", 0)
    }

    fn format_cookie(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.cookie_name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Identifier carried by a valid cookie.
    ///
    /// # Errors
    /// Returns `InvalidRememberMeCookie` on decode failure, bad structure,
    /// expiry, or signature mismatch.
    pub fn verify(&self, value: &str) -> Result<String, AuthenticationError> {
        let invalid = || AuthenticationError::InvalidRememberMeCookie;
        let decoded = Base64::decode_vec(value.trim()).map_err(|_| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;

        let mut parts = decoded.rsplitn(3, ':');
        let (Some(signature), Some(expires_at), Some(identifier)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if identifier.is_empty() {
            return Err(invalid());
        }
        let expires_at: i64 = expires_at.parse().map_err(|_| invalid())?;
        if expires_at <= self.clock.now() {
            debug!("Remember-me cookie expired");
            return Err(invalid());
        }
        let expected = self
            .signature(&format!("{identifier}:{expires_at}"))
            .map_err(|_| invalid())?;
        if !constant_time_eq(&expected, signature) {
            return Err(invalid());
        }
        Ok(identifier.to_string())
    }
}

pub struct RememberMeAuthenticator {
    services: Arc<RememberMeServices>,
    provider: Arc<dyn UserProvider>,
    status_checker: Arc<dyn AccountStatusChecker>,
}

impl RememberMeAuthenticator {
    #[must_use]
    pub fn new(
        services: Arc<RememberMeServices>,
        provider: Arc<dyn UserProvider>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            services,
            provider,
            status_checker,
        }
    }

    fn verify(&self, request: &SecurityRequest) -> Result<Authenticated, AuthenticationError> {
        let value = request
            .cookie(self.services.cookie_name())
            .ok_or(AuthenticationError::InvalidRememberMeCookie)?;
        let identifier = self.services.verify(value)?;
        let user = load_user(
            self.provider.as_ref(),
            &identifier,
            AuthenticationError::InvalidRememberMeCookie,
        )?;
        self.status_checker.check_pre_auth(&user)?;
        self.status_checker.check_post_auth(&user)?;
        Ok(Authenticated {
            user,
            provider: self.provider.name().to_string(),
            metadata: TokenMetadata::RememberMe,
        })
    }
}

impl Authenticator for RememberMeAuthenticator {
    fn name(&self) -> &str {
        REMEMBER_ME
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        request
            .cookie(self.services.cookie_name())
            .is_some_and(|value| !value.is_empty())
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
        SecurityResponse::unauthorized(error.to_string(), None)
            .with_cookie(self.services.clear_cookie())
    }

    fn logout_cookies(&self) -> Vec<String> {
        vec![self.services.clear_cookie()]
    }
}
