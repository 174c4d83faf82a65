//! HTTP surface: axum router with the security layer in front of every route.

pub mod handlers;
pub mod middleware;

use crate::security::{session::MemorySessionStore, SecurityKernel};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

use self::middleware::{require_roles, security_layer, RouteRoles};

pub const SESSION_COOKIE_NAME: &str = "gatehouse_session";

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<SecurityKernel>,
    pub sessions: MemorySessionStore,
}

impl AppState {
    #[must_use]
    pub fn new(kernel: Arc<SecurityKernel>, session_ttl: Duration) -> Self {
        Self {
            kernel,
            sessions: MemorySessionStore::new(session_ttl),
        }
    }
}

/// Build the application router.
///
/// Paths handled entirely by the security layer (login check, 2FA check,
/// logout) have no route of their own and reach the fallback only when the
/// layer delegates them.
#[must_use]
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin", get(handlers::admin))
        .route_layer(from_fn_with_state(
            RouteRoles::new(state.kernel.clone(), &["ROLE_ADMIN"]),
            require_roles,
        ));

    Router::new()
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/", get(handlers::home))
        .route("/login", get(handlers::login))
        .route("/2fa", get(handlers::two_factor_form))
        .route("/2fa/cancel", get(handlers::two_factor_cancel))
        .route("/api/me", get(handlers::me))
        .route("/api/token", post(handlers::token))
        .merge(admin)
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), security_layer))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
        .with_state(state)
}

/// Serve until ctrl-c.
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let method = request.method().as_str();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http.request", method, path, request_id)
}
