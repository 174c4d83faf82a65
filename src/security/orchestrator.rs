//! Per-request authentication state machine.
//!
//! Order of checks for a request inside a zone: logout, session restoration,
//! second-factor completion, pages reachable without authentication, then the
//! zone's strategies in their configured order. The orchestrator itself is
//! immutable; everything that changes lives in [`RequestContext`] and the
//! session.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    authenticator::{AuthOutcome, Authenticator, AuthenticatorRegistry},
    context::RequestContext,
    csrf::{logout_token_id, CsrfTokenManager},
    error::{AuthenticationError, SecurityError},
    firewall::{FirewallResolver, FirewallZone},
    request::SecurityRequest,
    response::{Decision, SecurityResponse},
    session::{target_path_key, Session, FLASH_ERROR, FLASH_INFO},
    token::Token,
    token_store::TokenStore,
    two_factor::TwoFactorFlow,
    user::{AccountStatusChecker, UserProvider, UserProviderError},
};

const FULL_AUTHENTICATION_REQUIRED: &str =
    "Full authentication is required to access this resource.";
const TWO_FACTOR_REQUIRED: &str = "Please enter your authentication code.";

pub struct AuthenticationOrchestrator {
    firewalls: FirewallResolver,
    registry: AuthenticatorRegistry,
    provider: Arc<dyn UserProvider>,
    status_checker: Arc<dyn AccountStatusChecker>,
    two_factor: TwoFactorFlow,
}

impl AuthenticationOrchestrator {
    #[must_use]
    pub fn new(
        firewalls: FirewallResolver,
        registry: AuthenticatorRegistry,
        provider: Arc<dyn UserProvider>,
        status_checker: Arc<dyn AccountStatusChecker>,
        two_factor: TwoFactorFlow,
    ) -> Self {
        Self {
            firewalls,
            registry,
            provider,
            status_checker,
            two_factor,
        }
    }

    #[must_use]
    pub fn firewalls(&self) -> &FirewallResolver {
        &self.firewalls
    }

    #[must_use]
    pub fn registry(&self) -> &AuthenticatorRegistry {
        &self.registry
    }

    /// Authenticate one request.
    ///
    /// # Errors
    /// Returns an error when a strategy rejects the request on a zone without
    /// fallthrough, when a CSRF token is invalid, or when the session or user
    /// backend fails.
    #[instrument(skip_all, fields(method = %context.request().method(), path = %context.request().path()))]
    pub fn handle(
        &self,
        context: &mut RequestContext,
        session: &mut dyn Session,
    ) -> Result<Decision, SecurityError> {
        let Some(zone) = self.firewalls.resolve(context) else {
            debug!("No firewall zone, request is not authenticated");
            context.set_firewall(None);
            return Ok(Decision::Proceed);
        };
        context.set_firewall(Some(zone.name.clone()));

        if !zone.security_enabled {
            debug!(firewall = %zone.name, "Security disabled for zone");
            context.set_security_enabled(false);
            return Ok(Decision::Proceed);
        }

        let request = context.request().clone();

        if let Some(logout) = &zone.logout {
            if logout.matches(request.method().as_str(), request.path()) {
                if logout.csrf
                    && !CsrfTokenManager::is_valid(
                        session,
                        &logout_token_id(&zone.name),
                        request.parameter(&logout.csrf_parameter),
                    )
                {
                    warn!(firewall = %zone.name, "Logout refused, invalid CSRF token");
                    return Err(SecurityError::InvalidCsrfToken);
                }
                CsrfTokenManager::remove(session, &logout_token_id(&zone.name));
                return Ok(Decision::Respond(self.logout(zone, context, session)?));
            }
        }

        if !zone.stateless {
            if let Some(decision) = self.restore(zone, context, session)? {
                return Ok(decision);
            }
        }

        let pending = TokenStore::load_pending(session)
            .filter(|token| token.firewall() == zone.name);
        if pending.is_some() {
            let paths = &zone.two_factor;
            if request.path() == paths.check_path && *request.method() == axum::http::Method::POST
            {
                let response =
                    self.two_factor
                        .complete(zone, &request, session, context.tokens_mut())?;
                return Ok(Decision::Respond(response));
            }
            if request.path() == paths.form_path || request.path() == paths.cancel_path {
                return Ok(Decision::Proceed);
            }
        }

        if zone.entry_point.as_deref() == Some(request.path())
            && *request.method() == axum::http::Method::GET
        {
            return Ok(Decision::Proceed);
        }

        self.authenticate(zone, &request, context, session)
    }

    /// Clear the zone's token and send the caller to the logout target.
    ///
    /// # Errors
    /// Returns an error if a strategy named by the zone is not registered.
    pub fn logout(
        &self,
        zone: &FirewallZone,
        context: &mut RequestContext,
        session: &mut dyn Session,
    ) -> Result<SecurityResponse, SecurityError> {
        let user = context
            .token()
            .map(|token| token.user().identifier.clone())
            .or_else(|| TokenStore::load(session, &zone.name).map(|t| t.user().identifier.clone()));
        clear_security_state(zone, context, session);
        debug!(firewall = %zone.name, user = user.as_deref().unwrap_or("-"), "Logged out");

        let target = zone
            .logout
            .as_ref()
            .map_or_else(|| "/".to_string(), |logout| logout.target.clone());
        let mut response = SecurityResponse::redirect(target);
        for authenticator in self.authenticators(zone)? {
            for cookie in authenticator.logout_cookies() {
                response = response.with_cookie(cookie);
            }
        }
        Ok(response)
    }

    /// Reinstall the token stored for this zone, refreshed from the user
    /// provider. A stored token that no longer refreshes logs the caller out.
    /// Returns `None` when there is nothing to restore.
    fn restore(
        &self,
        zone: &FirewallZone,
        context: &mut RequestContext,
        session: &mut dyn Session,
    ) -> Result<Option<Decision>, SecurityError> {
        let Some(token) = TokenStore::load(session, &zone.name) else {
            return Ok(None);
        };
        if token.firewall() != zone.name || token.is_pending() {
            warn!(firewall = %zone.name, "Discarding stored token issued for another state");
            TokenStore::remove(session, &zone.name);
            return Ok(None);
        }

        let user = match self.provider.refresh_user(token.user()) {
            Ok(user) => user,
            Err(UserProviderError::NotFound | UserProviderError::Unsupported(_)) => {
                info!(firewall = %zone.name, "Stored token no longer refers to a user");
                let response = self.logout(zone, context, session)?;
                return Ok(Some(Decision::Respond(response)));
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = self
            .status_checker
            .check_pre_auth(&user)
            .and_then(|()| self.status_checker.check_post_auth(&user))
        {
            info!(firewall = %zone.name, "Stored token refused: {err}");
            let response = self.logout(zone, context, session)?;
            return Ok(Some(Decision::Respond(response)));
        }

        let refreshed = token.refreshed(&user);
        if refreshed.roles() != token.roles() {
            TokenStore::save(session, &zone.name, &refreshed)?;
        }
        debug!(firewall = %zone.name, strategy = %refreshed.principal().strategy, "Session token restored");
        context.tokens_mut().set_token(refreshed);
        Ok(Some(Decision::Proceed))
    }

    fn authenticators(
        &self,
        zone: &FirewallZone,
    ) -> Result<Vec<Arc<dyn Authenticator>>, SecurityError> {
        zone.authenticators
            .iter()
            .map(|name| {
                self.registry
                    .create(name, zone)
                    .ok_or_else(|| SecurityError::UnknownAuthenticator(name.clone()))
            })
            .collect()
    }

    fn authenticate(
        &self,
        zone: &FirewallZone,
        request: &SecurityRequest,
        context: &mut RequestContext,
        session: &mut dyn Session,
    ) -> Result<Decision, SecurityError> {
        let authenticators = self.authenticators(zone)?;
        let client_addr = request.client_addr_string();
        let client_addr = client_addr.as_deref().unwrap_or("-");

        for authenticator in &authenticators {
            if !authenticator.supports(request) {
                continue;
            }
            let strategy = authenticator.name();
            match authenticator.authenticate(request, session) {
                AuthOutcome::Success(authenticated) => {
                    let token = authenticator.create_token(&authenticated, &zone.name);
                    if !zone.stateless {
                        session.migrate();
                        TokenStore::save(session, &zone.name, &token)?;
                    }
                    info!(firewall = %zone.name, strategy, client_addr, "Authentication succeeded");
                    let response = authenticator.on_success(request, session, &token)?;
                    context.tokens_mut().set_token(token);
                    return Ok(response.map_or(Decision::Proceed, Decision::Respond));
                }
                AuthOutcome::StepUpRequired(user) => {
                    let pending =
                        Token::pending(&user, self.provider.name(), &zone.name, strategy);
                    TokenStore::save_pending(session, &pending)?;
                    session.add_flash(FLASH_INFO, TWO_FACTOR_REQUIRED.to_string());
                    info!(firewall = %zone.name, strategy, client_addr, "Second factor required");
                    return Ok(Decision::Respond(authenticator.step_up_response(request)));
                }
                AuthOutcome::Failure(error) => {
                    warn!(firewall = %zone.name, strategy, client_addr, "Authentication failed: {error}");
                    if error == AuthenticationError::InvalidCsrfToken {
                        return Err(SecurityError::InvalidCsrfToken);
                    }
                    if zone.is_interactive() {
                        session.add_flash(FLASH_ERROR, error.to_string());
                        continue;
                    }
                    let response = authenticator.unauthorized_response(request, &error);
                    return Err(SecurityError::Authentication {
                        strategy: strategy.to_string(),
                        error,
                        response,
                    });
                }
            }
        }

        Ok(Decision::Respond(self.start_authentication(
            zone,
            request,
            session,
            &authenticators,
        )))
    }

    /// Nothing authenticated the request: send browsers to the entry point,
    /// everyone else a challenge.
    fn start_authentication(
        &self,
        zone: &FirewallZone,
        request: &SecurityRequest,
        session: &mut dyn Session,
        authenticators: &[Arc<dyn Authenticator>],
    ) -> SecurityResponse {
        if let (Some(entry_point), true) = (&zone.entry_point, zone.is_interactive()) {
            if *request.method() == axum::http::Method::GET {
                session.set(&target_path_key(&zone.name), request.path_and_query());
            }
            return SecurityResponse::redirect(entry_point.clone());
        }
        let challenge = authenticators
            .iter()
            .find_map(|authenticator| authenticator.challenge());
        SecurityResponse::unauthorized(FULL_AUTHENTICATION_REQUIRED, challenge)
    }
}

/// Forget the zone's token in the session and in the request.
fn clear_security_state(zone: &FirewallZone, context: &mut RequestContext, session: &mut dyn Session) {
    TokenStore::remove(session, &zone.name);
    context.tokens_mut().clear();
    if !zone.stateless {
        session.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{
        authenticator::{
            test_support::{provider, PASSWORD},
            AuthOutcome, Authenticated, BasicAuthenticator, FormLoginAuthenticator,
            FormLoginSettings, FORM_LOGIN, HTTP_BASIC,
        },
        brute_force::{ManualClock, NoopBruteForceGuard},
        csrf::AUTHENTICATE_TOKEN_ID,
        firewall::LogoutOptions,
        pattern::PathPattern,
        session::{security_key, MemorySession, MemorySessionStore, TWO_FACTOR_TOKEN_KEY},
        token::TokenMetadata,
        user::{DefaultAccountStatusChecker, InMemoryUserProvider, User},
    };
    use axum::http::{header, Method, StatusCode};
    use base64ct::{Base64, Encoding};
    use std::time::Duration;

    struct Always(&'static str);

    impl Authenticator for Always {
        fn name(&self) -> &str {
            self.0
        }

        fn supports(&self, _request: &SecurityRequest) -> bool {
            true
        }

        fn authenticate(&self, _request: &SecurityRequest, _session: &mut dyn Session) -> AuthOutcome {
            AuthOutcome::Success(Authenticated {
                user: User::new("alice").with_roles(&["ROLE_USER"]),
                provider: InMemoryUserProvider::NAME.to_string(),
                metadata: TokenMetadata::None,
            })
        }

        fn unauthorized_response(
            &self,
            _request: &SecurityRequest,
            error: &AuthenticationError,
        ) -> SecurityResponse {
            SecurityResponse::unauthorized(error.to_string(), None)
        }
    }

    fn zones() -> Vec<FirewallZone> {
        vec![
            FirewallZone::new("public", PathPattern::Prefix("/public".into()))
                .security_enabled(false),
            FirewallZone::new("api", PathPattern::Prefix("/api".into()))
                .stateless(true)
                .with_authenticators(&[HTTP_BASIC]),
            FirewallZone::new("main", PathPattern::Prefix("/".into()))
                .with_entry_point("/login")
                .with_logout(LogoutOptions {
                    path: "/logout".into(),
                    target: "/bye".into(),
                    methods: Vec::new(),
                    csrf: false,
                    csrf_parameter: "_csrf_token".into(),
                })
                .with_authenticators(&[FORM_LOGIN, "always"]),
        ]
    }

    fn orchestrator(zones: Vec<FirewallZone>) -> AuthenticationOrchestrator {
        let provider = provider();
        let mut registry = AuthenticatorRegistry::new();
        let basic_provider = provider.clone();
        registry.register(HTTP_BASIC, move |_zone| {
            Arc::new(BasicAuthenticator::new(
                "test",
                basic_provider.clone(),
                Arc::new(NoopBruteForceGuard),
                Arc::new(DefaultAccountStatusChecker),
            ))
        });
        let form_provider = provider.clone();
        registry.register(FORM_LOGIN, move |zone| {
            Arc::new(FormLoginAuthenticator::new(
                zone,
                FormLoginSettings::default(),
                form_provider.clone(),
                Arc::new(NoopBruteForceGuard),
                Arc::new(DefaultAccountStatusChecker),
            ))
        });
        registry.register("always", |_zone| Arc::new(Always("always")));
        let two_factor = TwoFactorFlow::new(
            provider.clone(),
            Arc::new(NoopBruteForceGuard),
            Arc::new(ManualClock::new(0)),
            "test",
        );
        AuthenticationOrchestrator::new(
            FirewallResolver::new(zones),
            registry,
            provider,
            Arc::new(DefaultAccountStatusChecker),
            two_factor,
        )
    }

    fn basic(credentials: &str) -> SecurityRequest {
        let value = format!("Basic {}", Base64::encode_string(credentials.as_bytes()));
        SecurityRequest::new(Method::GET, "/api/me").with_header(header::AUTHORIZATION, &value)
    }

    fn alice_token(zone: &str) -> Token {
        let user = User::new("alice").with_roles(&["ROLE_USER"]);
        Token::authenticated(&user, "memory", zone, FORM_LOGIN, TokenMetadata::None)
    }

    #[test]
    fn unmatched_and_disabled_zones_proceed() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones()[..2].to_vec());
        let mut session = MemorySession::new();

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/elsewhere"));
        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        assert_eq!(context.firewall(), None);

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/public/a"));
        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        assert_eq!(context.firewall(), Some("public"));
        assert!(!context.security_enabled());
        Ok(())
    }

    #[test]
    fn stateless_zone_authenticates_without_session_state() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut session = MemorySession::new();
        let mut context = RequestContext::new(basic(&format!("alice:{PASSWORD}")));

        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        assert_eq!(context.token().map(|t| t.user().identifier.as_str()), Some("alice"));
        assert!(session.is_empty());
        Ok(())
    }

    #[test]
    fn stateless_zone_failure_propagates_strategy_response() {
        let orchestrator = orchestrator(zones());
        let mut context = RequestContext::new(basic("alice:wrong"));
        let result = orchestrator.handle(&mut context, &mut MemorySession::new());
        let Err(SecurityError::Authentication { strategy, error, response }) = result else {
            panic!("expected authentication error");
        };
        assert_eq!(strategy, HTTP_BASIC);
        assert_eq!(error, AuthenticationError::BadCredentials);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn stateless_zone_without_credentials_is_challenged() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/api/me"));
        let Decision::Respond(response) = orchestrator.handle(&mut context, &mut MemorySession::new())? else {
            panic!("expected a challenge");
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let SecurityResponse::Unauthorized { challenge, .. } = response else {
            panic!("expected unauthorized");
        };
        assert_eq!(challenge.as_deref(), Some("Basic realm=\"test\""));
        Ok(())
    }

    #[test]
    fn failed_form_login_falls_through_to_next_strategy() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut session = MemorySession::new();
        let csrf = CsrfTokenManager::token(&mut session, AUTHENTICATE_TOKEN_ID)?;
        let request = SecurityRequest::new(Method::POST, "/login")
            .with_form_param("_username", "alice")
            .with_form_param("_password", "wrong")
            .with_form_param("_csrf_token", &csrf);
        let mut context = RequestContext::new(request);

        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        assert_eq!(context.token().map(|t| t.principal().strategy.as_str()), Some("always"));
        assert_eq!(
            session.peek_flashes(FLASH_ERROR),
            vec![AuthenticationError::BadCredentials.to_string()]
        );
        Ok(())
    }

    #[test]
    fn invalid_csrf_is_never_retried() {
        let orchestrator = orchestrator(zones());
        let request = SecurityRequest::new(Method::POST, "/login")
            .with_form_param("_username", "alice")
            .with_form_param("_password", PASSWORD);
        let mut context = RequestContext::new(request);
        let result = orchestrator.handle(&mut context, &mut MemorySession::new());
        assert!(matches!(result, Err(SecurityError::InvalidCsrfToken)));
        assert!(context.token().is_none());
    }

    #[test]
    fn successful_login_moves_session_to_new_id() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let mut session = store.load(None);
        let csrf = CsrfTokenManager::token(&mut session, AUTHENTICATE_TOKEN_ID)?;
        session.set(&target_path_key("main"), "/reports".into());
        let before = store.save(&mut session)?;

        let mut session = store.load(before.as_deref());
        let request = SecurityRequest::new(Method::POST, "/login")
            .with_form_param("_username", "alice")
            .with_form_param("_password", PASSWORD)
            .with_form_param("_csrf_token", &csrf);
        let mut context = RequestContext::new(request);
        let Decision::Respond(response) = orchestrator.handle(&mut context, &mut session)? else {
            panic!("expected redirect after login");
        };
        assert_eq!(response.location(), Some("/reports"));
        assert!(!session.has("_csrf/authenticate"));
        let after = store.save(&mut session)?;

        assert!(after.is_some());
        assert_ne!(before, after);
        assert!(!store.load(before.as_deref()).has(&security_key("main")));
        assert!(store.load(after.as_deref()).has(&security_key("main")));
        Ok(())
    }

    #[test]
    fn step_up_stores_pending_token_only() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut session = MemorySession::new();
        let csrf = CsrfTokenManager::token(&mut session, AUTHENTICATE_TOKEN_ID)?;
        let request = SecurityRequest::new(Method::POST, "/login")
            .with_form_param("_username", "mfa")
            .with_form_param("_password", PASSWORD)
            .with_form_param("_csrf_token", &csrf);
        let mut context = RequestContext::new(request);

        let Decision::Respond(response) = orchestrator.handle(&mut context, &mut session)? else {
            panic!("expected redirect to the code form");
        };
        assert_eq!(response.location(), Some("/2fa"));
        assert!(session.has(TWO_FACTOR_TOKEN_KEY));
        assert!(!session.has(&security_key("main")));
        assert!(context.token().is_none());
        assert_eq!(session.peek_flashes(FLASH_INFO), vec![TWO_FACTOR_REQUIRED.to_string()]);

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/2fa"));
        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        Ok(())
    }

    #[test]
    fn restored_token_picks_up_role_changes() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut session = MemorySession::new();
        let mut stale = alice_token("main");
        if let Token::Authenticated(principal) = &mut stale {
            principal.roles = vec!["ROLE_OLD".into()];
        }
        TokenStore::save(&mut session, "main", &stale)?;

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/account"));
        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));
        assert_eq!(context.token().map(Token::roles), Some(&["ROLE_USER".to_string()][..]));
        let stored = TokenStore::load(&mut session, "main");
        assert_eq!(stored.as_ref().map(Token::roles), Some(&["ROLE_USER".to_string()][..]));
        Ok(())
    }

    #[test]
    fn unrefreshable_token_is_cleared_fail_closed() -> anyhow::Result<()> {
        let mut zones = zones();
        zones[2].authenticators = vec![FORM_LOGIN.to_string()];
        let orchestrator = orchestrator(zones);
        let mut session = MemorySession::new();
        let ghost = User::new("ghost");
        let token = Token::authenticated(&ghost, "memory", "main", FORM_LOGIN, TokenMetadata::None);
        TokenStore::save(&mut session, "main", &token)?;

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/account"));
        let decision = orchestrator.handle(&mut context, &mut session)?;
        assert!(!session.has(&security_key("main")));
        assert!(session.is_empty());
        assert!(context.token().is_none());
        assert!(
            matches!(decision, Decision::Respond(ref response) if response.location() == Some("/bye")),
            "goes through the logout target, not the entry point"
        );
        Ok(())
    }

    #[test]
    fn logout_clears_session_and_redirects() -> anyhow::Result<()> {
        let orchestrator = orchestrator(zones());
        let mut session = MemorySession::new();
        TokenStore::save(&mut session, "main", &alice_token("main"))?;

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/logout"));
        let Decision::Respond(response) = orchestrator.handle(&mut context, &mut session)? else {
            panic!("expected logout redirect");
        };
        assert_eq!(response.location(), Some("/bye"));
        assert!(!session.has(&security_key("main")));
        assert!(session.is_empty());
        assert!(context.token().is_none());
        Ok(())
    }

    #[test]
    fn logout_with_csrf_requires_token() -> anyhow::Result<()> {
        let mut zones = zones();
        if let Some(logout) = zones[2].logout.as_mut() {
            logout.csrf = true;
        }
        let orchestrator = orchestrator(zones);
        let mut session = MemorySession::new();
        let csrf = CsrfTokenManager::token(&mut session, &logout_token_id("main"))?;

        let mut context = RequestContext::new(SecurityRequest::new(Method::POST, "/logout"));
        assert!(matches!(
            orchestrator.handle(&mut context, &mut session),
            Err(SecurityError::InvalidCsrfToken)
        ));

        let request =
            SecurityRequest::new(Method::POST, "/logout").with_form_param("_csrf_token", &csrf);
        let mut context = RequestContext::new(request);
        assert!(matches!(
            orchestrator.handle(&mut context, &mut session)?,
            Decision::Respond(_)
        ));
        Ok(())
    }

    #[test]
    fn entry_point_is_reachable_and_unknown_paths_redirect() -> anyhow::Result<()> {
        let mut zones = zones();
        zones[2].authenticators = vec![FORM_LOGIN.to_string()];
        let orchestrator = orchestrator(zones);
        let mut session = MemorySession::new();

        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/login"));
        assert!(matches!(orchestrator.handle(&mut context, &mut session)?, Decision::Proceed));

        let mut context =
            RequestContext::new(SecurityRequest::new(Method::GET, "/reports").with_query_param("y", "2024"));
        let Decision::Respond(response) = orchestrator.handle(&mut context, &mut session)? else {
            panic!("expected redirect to the entry point");
        };
        assert_eq!(response.location(), Some("/login"));
        assert_eq!(session.get(&target_path_key("main")), Some("/reports?y=2024"));
        Ok(())
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let zone = FirewallZone::new("x", PathPattern::Prefix("/".into()))
            .stateless(true)
            .with_authenticators(&["nope"]);
        let orchestrator = orchestrator(vec![zone]);
        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/"));
        assert!(matches!(
            orchestrator.handle(&mut context, &mut MemorySession::new()),
            Err(SecurityError::UnknownAuthenticator(name)) if name == "nope"
        ));
    }
}
