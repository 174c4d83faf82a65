use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::{
    gatehouse::{middleware::SecurityContext, AppState},
    security::{error::AccessDeniedError, SecurityError},
};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Issue a bearer JWT for the current principal.
pub async fn token(
    State(state): State<AppState>,
    Extension(context): Extension<SecurityContext>,
) -> Response {
    let Some(codec) = state.kernel.jwt() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Token issuance is not configured" })),
        )
            .into_response();
    };
    let Some(principal) = context.principal() else {
        return SecurityError::from(AccessDeniedError::Unauthenticated).into_response();
    };

    let mut claims = Map::new();
    claims.insert(
        "roles".to_string(),
        Value::from(principal.roles().to_vec()),
    );
    match codec.issue(&principal.user().identifier, claims) {
        Ok(token) => {
            info!(
                firewall = context.firewall.as_deref().unwrap_or("-"),
                "Issued bearer token"
            );
            Json(IssuedToken {
                token,
                token_type: "Bearer".to_string(),
                expires_in: codec.ttl().as_secs(),
            })
            .into_response()
        }
        Err(err) => {
            error!("Failed to sign token: {err}");
            SecurityError::Internal("token signing failed".to_string()).into_response()
        }
    }
}
