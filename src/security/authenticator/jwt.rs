//! Bearer JWT verification and issuance (HMAC algorithms).

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, get_current_timestamp, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{load_user, AuthOutcome, Authenticated, Authenticator, JWT};
use crate::security::{
    brute_force::{ensure_not_locked, register_failure, BruteForceGuard},
    error::AuthenticationError,
    request::SecurityRequest,
    response::SecurityResponse,
    session::Session,
    token::TokenMetadata,
    user::{AccountStatusChecker, UserProvider},
};

/// Signs and verifies tokens with one shared secret.
pub struct JwtCodec {
    secret: SecretString,
    algorithm: Algorithm,
    identifier_claim: String,
    ttl: Duration,
}

impl JwtCodec {
    #[must_use]
    pub fn new(
        secret: SecretString,
        algorithm: Algorithm,
        identifier_claim: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            secret,
            algorithm,
            identifier_claim: identifier_claim.into(),
            ttl,
        }
    }

    #[must_use]
    pub fn identifier_claim(&self) -> &str {
        &self.identifier_claim
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `identifier` that expires after the configured TTL.
    ///
    /// `extra` claims are merged in; the identifier, `iat`, `nbf` and `exp`
    /// claims always win.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn issue(
        &self,
        identifier: &str,
        extra: Map<String, Value>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = get_current_timestamp();
        let mut claims = extra;
        claims.insert(
            self.identifier_claim.clone(),
            Value::String(identifier.to_string()),
        );
        claims.insert("iat".to_string(), Value::from(now));
        claims.insert("nbf".to_string(), Value::from(now));
        claims.insert(
            "exp".to_string(),
            Value::from(now.saturating_add(self.ttl.as_secs())),
        );
        encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
    }

    /// Verify signature, `exp` (required) and `nbf` with no leeway.
    ///
    /// # Errors
    /// Maps verification failures onto authentication errors.
    pub fn decode(&self, token: &str) -> Result<Map<String, Value>, AuthenticationError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);

        decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => AuthenticationError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthenticationError::TokenNotYetValid,
            ErrorKind::InvalidSignature => AuthenticationError::InvalidSignature,
            _ => {
                debug!("Rejected malformed token: {err}");
                AuthenticationError::MalformedToken
            }
        })
    }
}

pub struct JwtAuthenticator {
    codec: Arc<JwtCodec>,
    header: String,
    prefix: String,
    provider: Arc<dyn UserProvider>,
    guard: Arc<dyn BruteForceGuard>,
    status_checker: Arc<dyn AccountStatusChecker>,
}

impl JwtAuthenticator {
    #[must_use]
    pub fn new(
        codec: Arc<JwtCodec>,
        header: impl Into<String>,
        prefix: impl Into<String>,
        provider: Arc<dyn UserProvider>,
        guard: Arc<dyn BruteForceGuard>,
        status_checker: Arc<dyn AccountStatusChecker>,
    ) -> Self {
        Self {
            codec,
            header: header.into(),
            prefix: prefix.into(),
            provider,
            guard,
            status_checker,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &JwtCodec {
        &self.codec
    }

    fn bearer<'r>(&self, request: &'r SecurityRequest) -> Option<&'r str> {
        let value = request.header(&self.header)?;
        let (scheme, token) = value.split_once(' ')?;
        let token = token.trim();
        (scheme == self.prefix && !token.is_empty()).then_some(token)
    }

    /// Attempts are throttled per caller address, not per subject.
    fn guard_identifier(request: &SecurityRequest) -> String {
        format!(
            "jwt:{}",
            request
                .client_addr_string()
                .unwrap_or_else(|| "unknown".to_string())
        )
    }

    fn verify(&self, request: &SecurityRequest) -> Result<Authenticated, AuthenticationError> {
        let token = self.bearer(request).ok_or(AuthenticationError::MalformedToken)?;
        let guard_identifier = Self::guard_identifier(request);
        ensure_not_locked(self.guard.as_ref(), &guard_identifier, None)?;

        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(err) => {
                if err.counts_as_attempt() {
                    register_failure(self.guard.as_ref(), &guard_identifier, None)?;
                }
                return Err(err);
            }
        };

        let Some(identifier) = claims
            .get(self.codec.identifier_claim())
            .and_then(Value::as_str)
        else {
            register_failure(self.guard.as_ref(), &guard_identifier, None)?;
            return Err(AuthenticationError::MalformedToken);
        };

        let user = load_user(
            self.provider.as_ref(),
            identifier,
            AuthenticationError::BadCredentials,
        )?;
        self.status_checker.check_pre_auth(&user)?;
        self.status_checker.check_post_auth(&user)?;

        Ok(Authenticated {
            user,
            provider: self.provider.name().to_string(),
            metadata: TokenMetadata::Jwt {
                claims: Value::Object(claims),
            },
        })
    }
}

impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &str {
        JWT
    }

    fn supports(&self, request: &SecurityRequest) -> bool {
        self.bearer(request).is_some()
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
        SecurityResponse::unauthorized(
            error.to_string(),
            Some(format!("{} error=\"invalid_token\"", self.prefix)),
        )
    }

    fn challenge(&self) -> Option<String> {
        Some(self.prefix.clone())
    }
}
