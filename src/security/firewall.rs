//! Firewall zones and path resolution.

use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{context::RequestContext, pattern::PathPattern};

static GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    GENERATION.fetch_add(1, Ordering::Relaxed)
}

fn default_true() -> bool {
    true
}

fn default_target_path() -> String {
    "/".to_string()
}

fn default_csrf_parameter() -> String {
    "_csrf_token".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LogoutOptions {
    pub path: String,
    #[serde(default = "default_target_path")]
    pub target: String,
    /// Allowed methods, empty means any.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub csrf: bool,
    #[serde(default = "default_csrf_parameter")]
    pub csrf_parameter: String,
}

impl LogoutOptions {
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        path == self.path
            && (self.methods.is_empty()
                || self
                    .methods
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(method)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TwoFactorPaths {
    pub form_path: String,
    pub check_path: String,
    pub cancel_path: String,
    pub code_parameter: String,
}

impl Default for TwoFactorPaths {
    fn default() -> Self {
        Self {
            form_path: "/2fa".to_string(),
            check_path: "/2fa_check".to_string(),
            cancel_path: "/2fa/cancel".to_string(),
            code_parameter: "_auth_code".to_string(),
        }
    }
}

/// A named security policy bound to a path pattern.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FirewallZone {
    #[serde(skip)]
    pub name: String,
    pub pattern: PathPattern,
    #[serde(default)]
    pub stateless: bool,
    #[serde(default = "default_true", rename = "security")]
    pub security_enabled: bool,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default = "default_target_path")]
    pub default_target_path: String,
    #[serde(default)]
    pub logout: Option<LogoutOptions>,
    #[serde(default)]
    pub authenticators: Vec<String>,
    #[serde(default)]
    pub two_factor: TwoFactorPaths,
}

impl FirewallZone {
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: PathPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            stateless: false,
            security_enabled: true,
            entry_point: None,
            default_target_path: default_target_path(),
            logout: None,
            authenticators: Vec::new(),
            two_factor: TwoFactorPaths::default(),
        }
    }

    #[must_use]
    pub fn with_entry_point(mut self, path: impl Into<String>) -> Self {
        self.entry_point = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_logout(mut self, logout: LogoutOptions) -> Self {
        self.logout = Some(logout);
        self
    }

    #[must_use]
    pub fn with_authenticators(mut self, names: &[&str]) -> Self {
        self.authenticators = names.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    #[must_use]
    pub fn security_enabled(mut self, enabled: bool) -> Self {
        self.security_enabled = enabled;
        self
    }

    /// Browser zones redirect to an entry point and keep state in the session.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.entry_point.is_some() && !self.stateless
    }
}

/// Maps request paths to the first matching zone, in declaration order.
#[derive(Clone, Debug)]
pub struct FirewallResolver {
    zones: Vec<FirewallZone>,
    generation: u64,
}

impl FirewallResolver {
    #[must_use]
    pub fn new(zones: Vec<FirewallZone>) -> Self {
        Self {
            zones,
            generation: next_generation(),
        }
    }

    #[must_use]
    pub fn zones(&self) -> &[FirewallZone] {
        &self.zones
    }

    #[must_use]
    pub fn zone(&self, name: &str) -> Option<&FirewallZone> {
        self.zones.iter().find(|zone| zone.name == name)
    }

    /// Cache key for resolutions made against the current zone list.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Swap the zone list. Cached resolutions made before the swap are ignored.
    pub fn replace_zones(&mut self, zones: Vec<FirewallZone>) {
        self.zones = zones;
        self.generation = next_generation();
    }

    /// Uncached resolution.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<&FirewallZone> {
        self.position(path).map(|index| &self.zones[index])
    }

    /// Resolve the request's path through the per-request cache.
    pub fn resolve(&self, context: &mut RequestContext) -> Option<&FirewallZone> {
        let path = context.request().path().to_string();
        let index = match context.cached_resolution(self.generation, &path) {
            Some(index) => index,
            None => {
                let index = self.position(&path);
                context.cache_resolution(self.generation, path, index);
                index
            }
        };
        index.and_then(|index| self.zones.get(index))
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.zones.iter().position(|zone| zone.pattern.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::request::SecurityRequest;
    use axum::http::Method;

    fn zone(name: &str, pattern: &str) -> FirewallZone {
        let Ok(pattern) = PathPattern::parse(pattern) else {
            panic!("test pattern should parse");
        };
        FirewallZone::new(name, pattern)
    }

    fn resolver() -> FirewallResolver {
        FirewallResolver::new(vec![
            zone("api", "api:0"),
            zone("admin", "/admin"),
            zone("main", "/"),
        ])
    }

    #[test]
    fn first_matching_zone_wins() {
        let resolver = resolver();
        let name = |path: &str| resolver.resolve_path(path).map(|z| z.name.clone());
        assert_eq!(name("/api/users"), Some("api".to_string()));
        assert_eq!(name("/admin/x"), Some("admin".to_string()));
        assert_eq!(name("/v1/api"), Some("main".to_string()));
        assert_eq!(name("/"), Some("main".to_string()));
    }

    #[test]
    fn no_match_yields_none() {
        let resolver = FirewallResolver::new(vec![zone("api", "api:0")]);
        assert!(resolver.resolve_path("/public").is_none());
    }

    #[test]
    fn resolution_is_cached_per_request_and_generation() {
        let mut resolver = resolver();
        let mut context = RequestContext::new(SecurityRequest::new(Method::GET, "/admin/users"));
        assert_eq!(
            resolver.resolve(&mut context).map(|z| z.name.as_str()),
            Some("admin")
        );
        assert_eq!(
            context.cached_resolution(resolver.generation(), "/admin/users"),
            Some(Some(1))
        );

        resolver.replace_zones(vec![zone("main", "/")]);
        assert_eq!(
            context.cached_resolution(resolver.generation(), "/admin/users"),
            None
        );
        assert_eq!(
            resolver.resolve(&mut context).map(|z| z.name.as_str()),
            Some("main")
        );
    }

    #[test]
    fn logout_matches_configured_methods() {
        let logout = LogoutOptions {
            path: "/logout".into(),
            target: "/".into(),
            methods: vec!["POST".into()],
            csrf: false,
            csrf_parameter: default_csrf_parameter(),
        };
        assert!(logout.matches("POST", "/logout"));
        assert!(!logout.matches("GET", "/logout"));
        let any = LogoutOptions {
            methods: vec![],
            ..logout
        };
        assert!(any.matches("GET", "/logout"));
        assert!(!any.matches("GET", "/logout/now"));
    }

    #[test]
    fn zone_deserializes_with_defaults() -> anyhow::Result<()> {
        let zone: FirewallZone = serde_json::from_str(
            r#"{"pattern": "/", "entry_point": "/login", "authenticators": ["form_login"]}"#,
        )?;
        assert!(zone.security_enabled);
        assert!(!zone.stateless);
        assert!(zone.is_interactive());
        assert_eq!(zone.default_target_path, "/");
        assert_eq!(zone.two_factor.form_path, "/2fa");
        Ok(())
    }
}
