use axum::{
    extract::Extension,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    gatehouse::middleware::SessionHandle,
    security::{
        csrf::{CsrfTokenManager, AUTHENTICATE_TOKEN_ID},
        error::SecurityError,
        session::{Session, FLASH_ERROR, FLASH_INFO, LAST_USERNAME_KEY},
    },
};

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct LoginPage {
    pub csrf_token: String,
    pub last_username: Option<String>,
    pub error: Option<String>,
    pub info: Vec<String>,
}

/// Data a login form needs: a CSRF token, the last identifier and pending flashes.
pub async fn login(Extension(session): Extension<SessionHandle>) -> Response {
    let mut session = session.lock();
    let csrf_token = match CsrfTokenManager::token(&mut *session, AUTHENTICATE_TOKEN_ID) {
        Ok(token) => token,
        Err(err) => return SecurityError::from(err).into_response(),
    };
    let page = LoginPage {
        csrf_token,
        last_username: session.get(LAST_USERNAME_KEY).map(ToString::to_string),
        error: session.take_flashes(FLASH_ERROR).pop(),
        info: session.take_flashes(FLASH_INFO),
    };
    Json(page).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::MemorySession;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn renders_flashes_once() -> anyhow::Result<()> {
        let mut session = MemorySession::new();
        session.set(LAST_USERNAME_KEY, "alice".to_string());
        session.add_flash(FLASH_ERROR, "first".to_string());
        session.add_flash(FLASH_ERROR, "Invalid credentials.".to_string());
        session.add_flash(FLASH_INFO, "hello".to_string());
        let handle = SessionHandle::new(session);

        let response = login(Extension(handle.clone())).await;
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let page: LoginPage = serde_json::from_slice(&body)?;
        assert_eq!(page.last_username.as_deref(), Some("alice"));
        assert_eq!(page.error.as_deref(), Some("Invalid credentials."));
        assert_eq!(page.info, vec!["hello".to_string()]);
        assert!(!page.csrf_token.is_empty());

        let session = handle.lock();
        assert!(session.peek_flashes(FLASH_ERROR).is_empty());
        assert!(CsrfTokenManager::is_valid(
            &*session,
            AUTHENTICATE_TOKEN_ID,
            Some(&page.csrf_token)
        ));
        Ok(())
    }
}
