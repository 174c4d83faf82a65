//! Second-factor completion for pending tokens.

use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};

use super::{
    brute_force::{ensure_not_locked, register_failure, register_success, BruteForceGuard, Clock},
    error::{AuthenticationError, SecurityError},
    firewall::FirewallZone,
    request::SecurityRequest,
    response::SecurityResponse,
    session::{target_path_key, Session, FLASH_ERROR},
    token::Token,
    token_store::TokenStore,
    user::{User, UserProvider, UserProviderError},
};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP: u64 = 30;

fn guard_identifier(identifier: &str) -> String {
    format!("2fa:{identifier}")
}

pub struct TwoFactorFlow {
    provider: Arc<dyn UserProvider>,
    guard: Arc<dyn BruteForceGuard>,
    clock: Arc<dyn Clock>,
    issuer: String,
}

impl TwoFactorFlow {
    #[must_use]
    pub fn new(
        provider: Arc<dyn UserProvider>,
        guard: Arc<dyn BruteForceGuard>,
        clock: Arc<dyn Clock>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            guard,
            clock,
            issuer: issuer.into(),
        }
    }

    fn totp(&self, user: &User) -> Option<TOTP> {
        let secret = user.totp_secret.as_ref()?;
        let bytes = Secret::Encoded(secret.clone()).to_bytes().ok()?;
        Some(TOTP::new_unchecked(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP,
            bytes,
            Some(self.issuer.clone()),
            user.identifier.clone(),
        ))
    }

    /// Check a TOTP code at the clock's current time.
    #[must_use]
    pub fn verify_code(&self, user: &User, code: &str) -> bool {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        let Some(totp) = self.totp(user) else {
            warn!("Two-factor user has no usable TOTP secret");
            return false;
        };
        let now = u64::try_from(self.clock.now()).unwrap_or(0);
        totp.check(code, now)
    }

    /// Finish a login waiting on its second factor.
    ///
    /// A good code replaces the pending token with a full one and redirects to
    /// the saved target. A bad code counts against the guard and sends the
    /// user back to the code form with an error flash.
    ///
    /// # Errors
    /// Returns an error if the session cannot be written or the user backend
    /// fails.
    pub fn complete(
        &self,
        zone: &FirewallZone,
        request: &SecurityRequest,
        session: &mut dyn Session,
        tokens: &mut TokenStore,
    ) -> Result<SecurityResponse, SecurityError> {
        let retry = SecurityResponse::redirect(zone.two_factor.form_path.clone());
        let Some(pending) = TokenStore::load_pending(session) else {
            return Ok(self.restart(zone));
        };
        if pending.firewall() != zone.name {
            return Ok(self.restart(zone));
        }

        let identifier = guard_identifier(&pending.user().identifier);
        let addr = request.client_addr_string();
        let addr = addr.as_deref();

        if let Err(err) = ensure_not_locked(self.guard.as_ref(), &identifier, addr) {
            session.add_flash(FLASH_ERROR, err.to_string());
            return Ok(retry);
        }

        let user = match self.provider.refresh_user(pending.user()) {
            Ok(user) => user,
            Err(UserProviderError::NotFound | UserProviderError::Unsupported(_)) => {
                TokenStore::remove_pending(session);
                return Ok(self.restart(zone));
            }
            Err(err) => return Err(err.into()),
        };

        let code = request
            .parameter(&zone.two_factor.code_parameter)
            .unwrap_or_default();
        if !self.verify_code(&user, code) {
            let error = register_failure(self.guard.as_ref(), &identifier, addr)
                .err()
                .unwrap_or(AuthenticationError::InvalidTwoFactorCode);
            warn!(firewall = %zone.name, "Second factor rejected");
            session.add_flash(FLASH_ERROR, error.to_string());
            return Ok(retry);
        }
        if let Err(err) = register_success(self.guard.as_ref(), &identifier, addr) {
            session.add_flash(FLASH_ERROR, err.to_string());
            return Ok(retry);
        }

        TokenStore::remove_pending(session);
        let token = pending.complete().refreshed(&user);
        if !zone.stateless {
            session.migrate();
            TokenStore::save(session, &zone.name, &token)?;
        }
        info!(firewall = %zone.name, strategy = %token.principal().strategy, "Second factor accepted");
        tokens.set_token(token);

        let target = session
            .remove(&target_path_key(&zone.name))
            .filter(|path| path.starts_with('/') && !path.starts_with("//"))
            .unwrap_or_else(|| zone.default_target_path.clone());
        Ok(SecurityResponse::see_other(target))
    }

    /// Drop a pending login, e.g. from the cancel page.
    pub fn cancel(session: &mut dyn Session) -> Option<Token> {
        let pending = TokenStore::load_pending(session);
        TokenStore::remove_pending(session);
        pending
    }

    fn restart(&self, zone: &FirewallZone) -> SecurityResponse {
        let location = zone
            .entry_point
            .clone()
            .unwrap_or_else(|| zone.default_target_path.clone());
        SecurityResponse::redirect(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{
        authenticator::test_support::{provider, TOTP_SECRET},
        brute_force::{FileBruteForceGuard, ManualClock, NoopBruteForceGuard, ThrottlePolicy},
        pattern::PathPattern,
        session::{security_key, MemorySession, MemorySessionStore, TWO_FACTOR_TOKEN_KEY},
    };
    use axum::http::{Method, StatusCode};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn zone() -> FirewallZone {
        FirewallZone::new("main", PathPattern::Prefix("/".into()))
            .with_entry_point("/login")
            .with_authenticators(&["form_login"])
    }

    fn flow(guard: Arc<dyn BruteForceGuard>, clock: Arc<ManualClock>) -> TwoFactorFlow {
        TwoFactorFlow::new(provider(), guard, clock, "gatehouse")
    }

    fn current_code(at: i64) -> anyhow::Result<String> {
        let bytes = Secret::Encoded(TOTP_SECRET.to_string())
            .to_bytes()
            .map_err(|err| anyhow::anyhow!("{err:?}"))?;
        let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes, None, "mfa".into());
        Ok(totp.generate(u64::try_from(at)?))
    }

    fn pending_session() -> anyhow::Result<MemorySession> {
        let mut session = MemorySession::new();
        let user = provider().load_user("mfa")?;
        let token = Token::pending(&user, "memory", "main", "form_login");
        TokenStore::save_pending(&mut session, &token)?;
        Ok(session)
    }

    fn submit(code: &str) -> SecurityRequest {
        SecurityRequest::new(Method::POST, "/2fa_check")
            .with_form_param("_auth_code", code)
            .with_client_addr([10, 0, 0, 1].into())
    }

    #[test]
    fn codes_are_checked_against_clock_time() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(NOW));
        let flow = flow(Arc::new(NoopBruteForceGuard), clock.clone());
        let user = provider().load_user("mfa")?;
        let code = current_code(NOW)?;
        assert!(flow.verify_code(&user, &code));
        clock.advance(Duration::from_secs(30));
        assert!(flow.verify_code(&user, &code), "one step of skew");
        clock.advance(Duration::from_secs(300));
        assert!(!flow.verify_code(&user, &code));
        assert!(!flow.verify_code(&user, "12345"));
        assert!(!flow.verify_code(&user, "abcdef"));
        Ok(())
    }

    #[test]
    fn good_code_installs_full_token_and_redirects() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(NOW));
        let flow = flow(Arc::new(NoopBruteForceGuard), clock);
        let mut session = pending_session()?;
        session.set(&target_path_key("main"), "/reports".into());
        let mut tokens = TokenStore::new();

        let response = flow.complete(&zone(), &submit(&current_code(NOW)?), &mut session, &mut tokens)?;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.location(), Some("/reports"));
        assert!(!session.has(TWO_FACTOR_TOKEN_KEY));
        assert!(session.has(&security_key("main")));
        let token = tokens.token().ok_or_else(|| anyhow::anyhow!("token missing"))?;
        assert!(token.is_fully_authenticated());
        assert_eq!(token.principal().strategy, "form_login");
        Ok(())
    }

    #[test]
    fn completion_moves_session_to_new_id() -> anyhow::Result<()> {
        let flow = flow(Arc::new(NoopBruteForceGuard), Arc::new(ManualClock::new(NOW)));
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let mut session = pending_session()?;
        let before = store.save(&mut session)?;

        let mut session = store.load(before.as_deref());
        let request = submit(&current_code(NOW)?);
        flow.complete(&zone(), &request, &mut session, &mut TokenStore::new())?;
        let after = store.save(&mut session)?;

        assert_ne!(before, after);
        assert!(!store.load(before.as_deref()).has(&security_key("main")));
        assert!(store.load(after.as_deref()).has(&security_key("main")));
        Ok(())
    }

    #[test]
    fn bad_code_flashes_and_counts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let clock = Arc::new(ManualClock::new(NOW));
        let policy = ThrottlePolicy {
            max_attempts: 2,
            ..ThrottlePolicy::default()
        };
        let guard = Arc::new(FileBruteForceGuard::new(dir.path(), policy)?.with_clock(clock.clone()));
        let flow = flow(guard.clone(), clock);
        let mut session = pending_session()?;
        let mut tokens = TokenStore::new();

        let response = flow.complete(&zone(), &submit("000000"), &mut session, &mut tokens)?;
        assert_eq!(response.location(), Some("/2fa"));
        assert!(session.has(TWO_FACTOR_TOKEN_KEY));
        assert!(tokens.token().is_none());
        assert_eq!(
            session.take_flashes(FLASH_ERROR),
            vec![AuthenticationError::InvalidTwoFactorCode.to_string()]
        );
        assert_eq!(guard.failure_count("2fa:mfa", Some("10.0.0.1"))?, 1);

        flow.complete(&zone(), &submit("000000"), &mut session, &mut tokens)?;
        assert!(guard.is_locked("2fa:mfa", Some("10.0.0.1"))?);

        let response = flow.complete(&zone(), &submit(&current_code(NOW)?), &mut session, &mut tokens)?;
        assert_eq!(response.location(), Some("/2fa"));
        assert!(tokens.token().is_none(), "locked key refuses valid codes");
        Ok(())
    }

    #[test]
    fn missing_pending_token_restarts_login() -> anyhow::Result<()> {
        let flow = flow(Arc::new(NoopBruteForceGuard), Arc::new(ManualClock::new(NOW)));
        let mut session = MemorySession::new();
        let response = flow.complete(&zone(), &submit("123456"), &mut session, &mut TokenStore::new())?;
        assert_eq!(response.location(), Some("/login"));
        Ok(())
    }

    #[test]
    fn cancel_drops_pending_token() -> anyhow::Result<()> {
        let mut session = pending_session()?;
        let dropped = TwoFactorFlow::cancel(&mut session);
        assert!(dropped.is_some_and(|token| token.is_pending()));
        assert!(!session.has(TWO_FACTOR_TOKEN_KEY));
        Ok(())
    }
}
