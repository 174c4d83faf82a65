//! Responses produced by the security layer instead of the protected resource.

use axum::{
    http::{
        header::{LOCATION, SET_COOKIE, WWW_AUTHENTICATE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecurityResponse {
    Redirect {
        location: String,
        status: StatusCode,
        cookies: Vec<String>,
    },
    Unauthorized {
        message: String,
        challenge: Option<String>,
        cookies: Vec<String>,
    },
}

impl SecurityResponse {
    /// 302 redirect.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            status: StatusCode::FOUND,
            cookies: Vec::new(),
        }
    }

    /// 303 redirect, used after a successful form submission.
    #[must_use]
    pub fn see_other(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            status: StatusCode::SEE_OTHER,
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>, challenge: Option<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            challenge,
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: String) -> Self {
        match &mut self {
            Self::Redirect { cookies, .. } | Self::Unauthorized { cookies, .. } => {
                cookies.push(cookie);
            }
        }
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Redirect { status, .. } => *status,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        }
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Redirect { location, .. } => Some(location),
            Self::Unauthorized { .. } => None,
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &[String] {
        match self {
            Self::Redirect { cookies, .. } | Self::Unauthorized { cookies, .. } => cookies,
        }
    }
}

fn append_cookies(response: &mut Response, cookies: &[String]) {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(err) => warn!("Dropping invalid Set-Cookie value: {err}"),
        }
    }
}

impl IntoResponse for SecurityResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect {
                location,
                status,
                cookies,
            } => {
                let mut response = status.into_response();
                match HeaderValue::from_str(&location) {
                    Ok(value) => {
                        response.headers_mut().insert(LOCATION, value);
                    }
                    Err(err) => warn!("Invalid redirect location: {err}"),
                }
                append_cookies(&mut response, &cookies);
                response
            }
            Self::Unauthorized {
                message,
                challenge,
                cookies,
            } => {
                let mut response =
                    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response();
                if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
                append_cookies(&mut response, &cookies);
                response
            }
        }
    }
}

/// Outcome of running the security layer for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the protected resource.
    Proceed,
    /// Short-circuit with a security response.
    Respond(SecurityResponse),
}
