//! Error taxonomy for the security core.

use super::{
    brute_force::GuardError, response::SecurityResponse, user::UserProviderError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// A credential was rejected by a verification strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("Invalid credentials.")]
    BadCredentials,
    #[error("Invalid CSRF token.")]
    InvalidCsrfToken,
    #[error("Too many failed login attempts, please try again in {remaining_seconds} seconds.")]
    LockedOut { remaining_seconds: u64 },
    #[error("Account is {0}.")]
    AccountStatus(String),
    #[error("Token has expired.")]
    TokenExpired,
    #[error("Token is not valid yet.")]
    TokenNotYetValid,
    #[error("Invalid token signature.")]
    InvalidSignature,
    #[error("Malformed token.")]
    MalformedToken,
    #[error("Invalid API key.")]
    InvalidApiKey,
    #[error("Invalid remember-me cookie.")]
    InvalidRememberMeCookie,
    #[error("Token is not active.")]
    InactiveToken,
    #[error("Token introspection failed.")]
    IntrospectionFailed,
    #[error("Invalid authentication code.")]
    InvalidTwoFactorCode,
    #[error("Authentication is temporarily unavailable.")]
    ServiceUnavailable,
}

impl AuthenticationError {
    /// Whether the brute-force guard should count this failure.
    ///
    /// Expired and not-yet-valid tokens were once valid, so they are not
    /// treated as guessing attempts.
    #[must_use]
    pub fn counts_as_attempt(&self) -> bool {
        matches!(
            self,
            Self::BadCredentials
                | Self::InvalidSignature
                | Self::MalformedToken
                | Self::InvalidTwoFactorCode
        )
    }
}

/// Access-control denial.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDeniedError {
    #[error("Method {0} is not allowed.")]
    MethodNotAllowed(String),
    #[error("A secure channel is required.")]
    InsecureChannel,
    #[error("Access denied for this address.")]
    AddressNotAllowed,
    #[error("Full authentication is required to access this resource.")]
    Unauthenticated,
    #[error("Access denied, one of [{}] is required.", .0.join(", "))]
    MissingRole(Vec<String>),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to serialize session value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to generate random token: {0}")]
    Random(#[from] rand::Error),
}

/// Umbrella error returned by the orchestrator and the kernel.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// A strategy rejected the request and no fallthrough applied.
    #[error("authentication failed for strategy '{strategy}': {error}")]
    Authentication {
        strategy: String,
        error: AuthenticationError,
        response: SecurityResponse,
    },
    #[error("Invalid CSRF token.")]
    InvalidCsrfToken,
    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    UserProvider(#[from] UserProviderError),
    #[error(transparent)]
    Guard(#[from] GuardError),
    #[error("unknown authenticator '{0}'")]
    UnknownAuthenticator(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        match self {
            Self::Authentication { response, .. } => response.into_response(),
            Self::InvalidCsrfToken => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": AuthenticationError::InvalidCsrfToken.to_string() })),
            )
                .into_response(),
            Self::AccessDenied(err) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": err.to_string() }))).into_response()
            }
            other => {
                error!("Security layer failure: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}
