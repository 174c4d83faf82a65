pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod two_factor;
pub use self::two_factor::{two_factor_cancel, two_factor_form};

pub mod principal;
pub use self::principal::{admin, home, me};

pub mod token;
pub use self::token::token;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
