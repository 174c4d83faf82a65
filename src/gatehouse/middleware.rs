//! Request-level glue between axum and the security kernel.
//!
//! The kernel is synchronous (file locks, blocking introspection calls), so it
//! runs on the blocking pool. The session travels into the blocking task and
//! back, then is handed to the route through a shared handle.

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, Request, State},
    http::{header::SET_COOKIE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, error, warn};

use super::{AppState, SESSION_COOKIE_NAME};
use crate::security::{
    error::SecurityError,
    session::{MemorySession, MemorySessionStore},
    Decision, KernelOutcome, SecurityKernel, SecurityRequest, Token,
};

const MAX_BODY_BYTES: usize = 64 * 1024;

/// What the security layer established for a delegated request.
#[derive(Clone, Debug, Default)]
pub struct SecurityContext {
    pub token: Option<Token>,
    pub firewall: Option<String>,
}

impl SecurityContext {
    /// The token, if it is fully authenticated.
    #[must_use]
    pub fn principal(&self) -> Option<&Token> {
        self.token
            .as_ref()
            .filter(|token| token.is_fully_authenticated())
    }
}

/// Session shared with the route handler; written back after the handler ran.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle(Arc<Mutex<MemorySession>>);

impl SessionHandle {
    #[must_use]
    pub fn new(session: MemorySession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub fn lock(&self) -> MutexGuard<'_, MemorySession> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> MemorySession {
        std::mem::take(&mut *self.lock())
    }
}

pub async fn security_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Rejecting request body: {err}");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "Request body too large" })),
            )
                .into_response();
        }
    };

    let security_request = SecurityRequest::from_parts(&parts, &bytes, client_addr)
        .trust_forwarded_proto(state.kernel.trusts_forwarded_proto());
    let secure = security_request.is_secure();
    let previous_id = security_request
        .cookie(SESSION_COOKIE_NAME)
        .map(ToString::to_string);
    let mut session = state.sessions.load(previous_id.as_deref());

    let kernel = state.kernel.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let result = kernel.handle(security_request, &mut session);
        (result, session)
    })
    .await;
    let (result, session) = match joined {
        Ok(joined) => joined,
        Err(err) => {
            error!("Security task failed: {err}");
            return SecurityError::Internal("security task failed".to_string()).into_response();
        }
    };

    let (mut response, session) = match result {
        Ok(KernelOutcome {
            decision: Decision::Proceed,
            token,
            firewall,
        }) => {
            let handle = SessionHandle::new(session);
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request
                .extensions_mut()
                .insert(SecurityContext { token, firewall });
            request.extensions_mut().insert(handle.clone());
            let response = next.run(request).await;
            (response, handle.take())
        }
        Ok(KernelOutcome {
            decision: Decision::Respond(response),
            ..
        }) => (response.into_response(), session),
        Err(err) => {
            debug!("Security layer refused request: {err}");
            (err.into_response(), session)
        }
    };

    persist_session(
        &state.sessions,
        session,
        previous_id.as_deref(),
        secure,
        &mut response,
    );
    response
}

fn persist_session(
    store: &MemorySessionStore,
    mut session: MemorySession,
    previous_id: Option<&str>,
    secure: bool,
    response: &mut Response,
) {
    let cookie = match store.save(&mut session) {
        Ok(Some(id)) if previous_id != Some(id.as_str()) => {
            session_cookie(&id, store.ttl().as_secs(), secure)
        }
        Ok(None) if previous_id.is_some() => session_cookie("", 0, secure),
        Ok(_) => return,
        Err(err) => {
            error!("Failed to save session: {err}");
            return;
        }
    };
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => warn!("Invalid session cookie: {err}"),
    }
}

fn session_cookie(id: &str, max_age: u64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Roles required by a group of routes, any one of them suffices.
#[derive(Clone)]
pub struct RouteRoles {
    kernel: Arc<SecurityKernel>,
    roles: Arc<[String]>,
}

impl RouteRoles {
    #[must_use]
    pub fn new(kernel: Arc<SecurityKernel>, roles: &[&str]) -> Self {
        Self {
            kernel,
            roles: roles.iter().map(ToString::to_string).collect(),
        }
    }
}

pub async fn require_roles(
    State(route): State<RouteRoles>,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .extensions()
        .get::<SecurityContext>()
        .and_then(|context| context.token.as_ref());
    let allowed = route.kernel.access().enforce_roles(token, &route.roles[..]);
    match allowed {
        Ok(()) => next.run(request).await,
        Err(err) => SecurityError::from(err).into_response(),
    }
}
