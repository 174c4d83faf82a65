//! Long-lived security kernel: wiring from configuration plus the
//! per-request entry point used by the HTTP middleware.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::{
    access_control::{AccessControlEnforcer, RoleHierarchy},
    authenticator::{
        ApiKeyAuthenticator, ApiKeySettings, Authenticator, AuthenticatorRegistry,
        BasicAuthenticator, FormLoginAuthenticator, HttpTokenIntrospector, IntrospectionError,
        JwtAuthenticator, JwtCodec, OAuthAuthenticator, RememberMeAuthenticator,
        RememberMeServices, TokenIntrospector, API_KEY, FORM_LOGIN, HTTP_BASIC, JWT, OAUTH,
        REMEMBER_ME,
    },
    brute_force::{
        BruteForceGuard, Clock, FileBruteForceGuard, GuardError, NoopBruteForceGuard,
        RedisBruteForceGuard, SystemClock,
    },
    context::RequestContext,
    error::SecurityError,
    firewall::{FirewallResolver, FirewallZone},
    orchestrator::AuthenticationOrchestrator,
    request::SecurityRequest,
    response::Decision,
    session::Session,
    token::Token,
    two_factor::TwoFactorFlow,
    user::{AccountStatusChecker, DefaultAccountStatusChecker, UserProvider},
};
use crate::config::{ConfigError, GuardBackend, SecurityConfig};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up brute-force guard: {0}")]
    Guard(#[from] GuardError),
    #[error("failed to set up token introspection: {0}")]
    Introspection(#[from] IntrospectionError),
}

/// Secrets are passed on the command line, never read from the config file.
#[derive(Default)]
pub struct KernelSecrets {
    pub jwt: Option<SecretString>,
    pub remember_me: Option<SecretString>,
    pub oauth_client: Option<SecretString>,
}

pub struct KernelOptions {
    pub secrets: KernelSecrets,
    pub clock: Arc<dyn Clock>,
    /// Replaces the HTTP introspector built from the `oauth` section.
    pub introspector: Option<Arc<dyn TokenIntrospector>>,
    pub status_checker: Arc<dyn AccountStatusChecker>,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            secrets: KernelSecrets::default(),
            clock: Arc::new(SystemClock),
            introspector: None,
            status_checker: Arc::new(DefaultAccountStatusChecker),
        }
    }
}

/// What the middleware needs after the security layer ran.
#[derive(Debug)]
pub struct KernelOutcome {
    pub decision: Decision,
    pub token: Option<Token>,
    pub firewall: Option<String>,
}

pub struct SecurityKernel {
    orchestrator: AuthenticationOrchestrator,
    access: AccessControlEnforcer,
    jwt: Option<Arc<JwtCodec>>,
    trust_forwarded_proto: bool,
}

impl SecurityKernel {
    #[must_use]
    pub fn new(
        orchestrator: AuthenticationOrchestrator,
        access: AccessControlEnforcer,
        jwt: Option<Arc<JwtCodec>>,
    ) -> Self {
        Self {
            orchestrator,
            access,
            jwt,
            trust_forwarded_proto: false,
        }
    }

    #[must_use]
    pub fn with_trusted_forwarded_proto(mut self, trusted: bool) -> Self {
        self.trust_forwarded_proto = trusted;
        self
    }

    /// Whether `X-Forwarded-Proto` decides the request channel.
    #[must_use]
    pub fn trusts_forwarded_proto(&self) -> bool {
        self.trust_forwarded_proto
    }

    /// Build every configured strategy, the guard backend and the access rules.
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid, a secret required
    /// by a configured strategy is missing, or a backend cannot be set up.
    pub fn from_config(
        config: &SecurityConfig,
        provider: Arc<dyn UserProvider>,
        options: KernelOptions,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        let KernelOptions {
            secrets,
            clock,
            introspector,
            status_checker,
        } = options;

        let guard = build_guard(config, clock.clone())?;
        let mut registry = AuthenticatorRegistry::new();

        let remember_me = match secrets.remember_me {
            Some(secret) => Some(Arc::new(
                RememberMeServices::new(
                    config.remember_me.cookie_name.clone(),
                    secret,
                    Duration::from_secs(config.remember_me.lifetime_seconds),
                )
                .with_secure(config.remember_me.secure)
                .with_clock(clock.clone()),
            )),
            None if config.uses(REMEMBER_ME) => {
                return Err(ConfigError::MissingSecret("remember-me").into())
            }
            None => None,
        };

        {
            let settings = config.form_login.clone();
            let provider = provider.clone();
            let guard = guard.clone();
            let checker = status_checker.clone();
            let remember_me = remember_me.clone();
            registry.register(FORM_LOGIN, move |zone: &FirewallZone| -> Arc<dyn Authenticator> {
                let remember = remember_me
                    .clone()
                    .filter(|_| zone.authenticators.iter().any(|name| name == REMEMBER_ME));
                Arc::new(
                    FormLoginAuthenticator::new(
                        zone,
                        settings.clone(),
                        provider.clone(),
                        guard.clone(),
                        checker.clone(),
                    )
                    .with_remember_me(remember),
                )
            });
        }

        {
            let realm = config.http_basic.realm.clone();
            let provider = provider.clone();
            let guard = guard.clone();
            let checker = status_checker.clone();
            registry.register(HTTP_BASIC, move |_zone: &FirewallZone| -> Arc<dyn Authenticator> {
                Arc::new(BasicAuthenticator::new(
                    realm.clone(),
                    provider.clone(),
                    guard.clone(),
                    checker.clone(),
                ))
            });
        }

        let jwt = match secrets.jwt {
            Some(secret) => Some(Arc::new(JwtCodec::new(
                secret,
                config.jwt.algorithm()?,
                config.jwt.identifier_claim.clone(),
                Duration::from_secs(config.jwt.ttl_seconds),
            ))),
            None if config.uses(JWT) => return Err(ConfigError::MissingSecret("jwt").into()),
            None => None,
        };
        if let Some(codec) = &jwt {
            let codec = codec.clone();
            let header = config.jwt.header.clone();
            let prefix = config.jwt.prefix.clone();
            let provider = provider.clone();
            let guard = guard.clone();
            let checker = status_checker.clone();
            registry.register(JWT, move |_zone: &FirewallZone| -> Arc<dyn Authenticator> {
                Arc::new(JwtAuthenticator::new(
                    codec.clone(),
                    header.clone(),
                    prefix.clone(),
                    provider.clone(),
                    guard.clone(),
                    checker.clone(),
                ))
            });
        }

        {
            let settings = ApiKeySettings {
                header: config.api_key.header.clone(),
                query_parameter: config.api_key.query_parameter.clone(),
                keys: config.api_key.keys.clone(),
            };
            let provider = provider.clone();
            let checker = status_checker.clone();
            registry.register(API_KEY, move |_zone: &FirewallZone| -> Arc<dyn Authenticator> {
                Arc::new(ApiKeyAuthenticator::new(
                    settings.clone(),
                    provider.clone(),
                    checker.clone(),
                ))
            });
        }

        if let Some(services) = remember_me {
            let provider = provider.clone();
            let checker = status_checker.clone();
            registry.register(REMEMBER_ME, move |_zone: &FirewallZone| -> Arc<dyn Authenticator> {
                Arc::new(RememberMeAuthenticator::new(
                    services.clone(),
                    provider.clone(),
                    checker.clone(),
                ))
            });
        }

        let introspector = match introspector {
            Some(introspector) => Some(introspector),
            None if config.uses(OAUTH) => {
                let endpoint = config
                    .oauth
                    .introspection_url
                    .clone()
                    .ok_or(ConfigError::MissingIntrospectionUrl)?;
                let secret = secrets
                    .oauth_client
                    .ok_or(ConfigError::MissingSecret("oauth client"))?;
                let introspector: Arc<dyn TokenIntrospector> = Arc::new(
                    HttpTokenIntrospector::new(
                        endpoint,
                        config.oauth.client_id.clone(),
                        secret,
                        config.oauth.timeout(),
                    )?,
                );
                Some(introspector)
            }
            None => None,
        };
        if let Some(introspector) = introspector {
            let provider = provider.clone();
            let checker = status_checker.clone();
            registry.register(OAUTH, move |_zone: &FirewallZone| -> Arc<dyn Authenticator> {
                Arc::new(OAuthAuthenticator::new(
                    introspector.clone(),
                    provider.clone(),
                    checker.clone(),
                ))
            });
        }

        let two_factor = TwoFactorFlow::new(
            provider.clone(),
            guard,
            clock,
            config.two_factor.issuer.clone(),
        );
        info!(
            zones = config.zones().len(),
            strategies = ?registry.names(),
            "Security kernel configured"
        );
        let orchestrator = AuthenticationOrchestrator::new(
            FirewallResolver::new(config.zones().to_vec()),
            registry,
            provider,
            status_checker,
            two_factor,
        );
        let access = AccessControlEnforcer::new(
            config.access_rules()?,
            RoleHierarchy::new(config.role_hierarchy.clone()),
        );
        Ok(Self::new(orchestrator, access, jwt)
            .with_trusted_forwarded_proto(config.trust_forwarded_proto))
    }

    #[must_use]
    pub fn orchestrator(&self) -> &AuthenticationOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn access(&self) -> &AccessControlEnforcer {
        &self.access
    }

    /// Codec used to issue bearer tokens, when JWT is configured.
    #[must_use]
    pub fn jwt(&self) -> Option<&JwtCodec> {
        self.jwt.as_deref()
    }

    /// Authenticate, then apply access rules when the request is delegated.
    ///
    /// # Errors
    /// Returns authentication failures that do not fall through, access
    /// denials, and backend errors.
    #[instrument(skip_all)]
    pub fn handle(
        &self,
        request: SecurityRequest,
        session: &mut dyn Session,
    ) -> Result<KernelOutcome, SecurityError> {
        let mut context = RequestContext::new(request);
        let decision = self.orchestrator.handle(&mut context, session)?;
        if matches!(decision, Decision::Proceed) && context.security_enabled() {
            self.access.enforce(context.request(), context.token())?;
        }
        debug!(firewall = context.firewall().unwrap_or("-"), "Security layer done");
        let firewall = context.firewall().map(ToString::to_string);
        Ok(KernelOutcome {
            decision,
            token: context.into_token(),
            firewall,
        })
    }
}

fn build_guard(
    config: &SecurityConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn BruteForceGuard>, GuardError> {
    let policy = config.brute_force.policy();
    let guard: Arc<dyn BruteForceGuard> = match &config.brute_force.backend {
        GuardBackend::File { directory } => {
            Arc::new(FileBruteForceGuard::new(directory.clone(), policy)?.with_clock(clock))
        }
        GuardBackend::Redis { url, namespace } => {
            let mut guard = RedisBruteForceGuard::new(url, policy)?.with_clock(clock);
            if let Some(namespace) = namespace {
                guard = guard.with_namespace(namespace.clone());
            }
            Arc::new(guard)
        }
        GuardBackend::None => Arc::new(NoopBruteForceGuard),
    };
    Ok(guard)
}
