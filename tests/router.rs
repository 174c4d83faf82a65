//! Smoke tests for the axum router with the security layer in front.

use anyhow::{anyhow, Result};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE, WWW_AUTHENTICATE},
        Request, Response, StatusCode,
    },
    Router,
};
use base64ct::{Base64, Encoding};
use gatehouse::{
    config::SecurityConfig,
    gatehouse::{router, AppState},
    security::{
        password::hash_password,
        user::{InMemoryUserProvider, User},
        KernelOptions, KernelSecrets, SecurityKernel,
    },
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery staple";

fn app(dir: &std::path::Path) -> Result<Router> {
    app_with(dir, |_| {})
}

fn app_with(dir: &std::path::Path, adjust: impl FnOnce(&mut Value)) -> Result<Router> {
    let mut config = json!({
        "firewalls": {
            "health": {"pattern": "/health", "security": false},
            "api": {"pattern": "/api", "stateless": true, "authenticators": ["http_basic", "jwt"]},
            "main": {
                "pattern": "/",
                "entry_point": "/login",
                "logout": {"path": "/logout", "target": "/login"},
                "authenticators": ["form_login"]
            }
        },
        "access_control": [
            {"path": "/login", "roles": ["PUBLIC_ACCESS"]},
            {"path": "/", "roles": ["IS_AUTHENTICATED"]}
        ],
        "brute_force": {"backend": {"type": "file", "directory": dir}}
    });
    adjust(&mut config);
    let config = SecurityConfig::from_json(&config.to_string())?;

    let hash = hash_password(PASSWORD).map_err(|err| anyhow!("{err}"))?;
    let provider = InMemoryUserProvider::new(vec![
        User::new("alice")
            .with_password_hash(hash.clone())
            .with_roles(&["ROLE_USER"]),
        User::new("root")
            .with_password_hash(hash)
            .with_roles(&["ROLE_ADMIN"]),
    ]);
    let options = KernelOptions {
        secrets: KernelSecrets {
            jwt: Some(SecretString::from("router-test-secret".to_string())),
            ..KernelSecrets::default()
        },
        ..KernelOptions::default()
    };
    let kernel = SecurityKernel::from_config(&config, Arc::new(provider), options)?;
    Ok(router(AppState::new(Arc::new(kernel), Duration::from_secs(600))))
}

fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            cookie
                .strip_prefix("gatehouse_session=")
                .and_then(|rest| rest.split(';').next())
                .filter(|id| !id.is_empty())
                .map(|id| format!("gatehouse_session={id}"))
        })
}

fn location(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Log in through the form and return the session cookie.
async fn login(app: &Router, user: &str) -> Result<String> {
    Ok(login_with_cookies(app, user).await?.1)
}

/// Log in through the form and return the pre-login and post-login cookies.
async fn login_with_cookies(app: &Router, user: &str) -> Result<(String, String)> {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/login").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).ok_or_else(|| anyhow!("no session cookie"))?;
    let page = json_body(response).await?;
    let csrf = page["csrf_token"]
        .as_str()
        .ok_or_else(|| anyhow!("no csrf token"))?;

    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("_username", user)
        .append_pair("_password", PASSWORD)
        .append_pair("_csrf_token", csrf)
        .finish();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(COOKIE, &cookie)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/"));
    let fresh = session_cookie(&response).ok_or_else(|| anyhow!("login kept the session id"))?;
    assert_ne!(fresh, cookie);
    Ok((cookie, fresh))
}

#[tokio::test]
async fn health_is_public_and_tagged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let response = app(dir.path())?
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("X-App"));
    assert!(session_cookie(&response).is_none());
    let body = json_body(response).await?;
    assert_eq!(body["name"], "gatehouse");
    Ok(())
}

#[tokio::test]
async fn anonymous_browser_is_sent_to_login() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let response = app(dir.path())?
        .oneshot(Request::builder().uri("/reports").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));
    assert!(session_cookie(&response).is_some(), "target path is kept in a session");
    Ok(())
}

#[tokio::test]
async fn login_rotates_session_id() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = app(dir.path())?;
    let (before, after) = login_with_cookies(&app, "alice").await?;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").header(COOKIE, &before).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));

    let response = app
        .oneshot(Request::builder().uri("/").header(COOKIE, &after).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn form_login_without_csrf_token_is_forbidden() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("_username", "alice")
        .append_pair("_password", PASSWORD)
        .finish();
    let response = app(dir.path())?
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await?;
    assert_eq!(body["error"], "Invalid CSRF token.");
    Ok(())
}

#[tokio::test]
async fn form_login_then_home_and_admin() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = app(dir.path())?;
    let cookie = login(&app, "alice").await?;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").header(COOKIE, &cookie).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"], "alice");
    assert_eq!(body["firewall"], "main");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/admin").header(COOKIE, &cookie).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = login(&app, "root").await?;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/admin").header(COOKIE, &admin).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/logout").header(COOKIE, &cookie).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), Some("/login"));

    let response = app
        .oneshot(Request::builder().uri("/").header(COOKIE, &cookie).body(Body::empty())?)
        .await?;
    assert_eq!(location(&response), Some("/login"));
    Ok(())
}

#[tokio::test]
async fn basic_credentials_trade_for_a_bearer_token() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let app = app(dir.path())?;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/me").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok()),
        Some("Basic realm=\"gatehouse\"")
    );

    let basic = Base64::encode_string(format!("alice:{PASSWORD}").as_bytes());
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/token")
                .header(AUTHORIZATION, format!("Basic {basic}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).is_none(), "stateless zone");
    let issued = json_body(response).await?;
    assert_eq!(issued["token_type"], "Bearer");
    let token = issued["token"]
        .as_str()
        .ok_or_else(|| anyhow!("no token"))?;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["user"], "alice");
    assert_eq!(body["strategy"], "jwt");
    Ok(())
}

#[tokio::test]
async fn unknown_paths_in_open_zones_are_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let response = app(dir.path())?
        .oneshot(Request::builder().uri("/health/deep").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn https_rules_follow_trusted_proxy_header() -> Result<()> {
    let https_login = |config: &mut Value| {
        config["access_control"][0]["requires_channel"] = json!("https");
    };
    let get_login = |proto: Option<&str>| -> Result<Request<Body>> {
        let mut builder = Request::builder().uri("/login");
        if let Some(proto) = proto {
            builder = builder.header("x-forwarded-proto", proto);
        }
        Ok(builder.body(Body::empty())?)
    };

    let dir = tempfile::tempdir()?;
    let untrusted = app_with(dir.path(), https_login)?;
    let response = untrusted.oneshot(get_login(Some("https"))?).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let trusted = app_with(dir.path(), |config| {
        https_login(config);
        config["trust_forwarded_proto"] = json!(true);
    })?;
    let response = trusted.clone().oneshot(get_login(None)?).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = trusted.oneshot(get_login(Some("https"))?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let secure_cookie = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|cookie| cookie.starts_with("gatehouse_session=") && cookie.ends_with("; Secure"));
    assert!(secure_cookie);
    Ok(())
}
