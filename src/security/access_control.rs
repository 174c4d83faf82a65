//! Path based access rules and role checks.
//!
//! Rules are tried in declaration order and the first one whose path pattern
//! matches decides alone. Later rules are never consulted, even if they would
//! have allowed the request.

use axum::http::Method;
use ipnetwork::IpNetwork;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use tracing::{debug, warn};

use super::{
    error::AccessDeniedError, pattern::PathPattern, request::SecurityRequest, token::Token,
};

/// Always granted, even without a token.
pub const PUBLIC_ACCESS: &str = "PUBLIC_ACCESS";
/// Granted to any fully authenticated token.
pub const IS_AUTHENTICATED: &str = "IS_AUTHENTICATED";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRule {
    pub path: PathPattern,
    /// Empty means any method.
    pub methods: Vec<Method>,
    pub requires_secure_channel: bool,
    /// Empty means any address.
    pub ips: Vec<IpNetwork>,
    /// The principal needs any one of these. Empty means no requirement.
    pub roles: Vec<String>,
}

impl AccessRule {
    #[must_use]
    pub fn new(path: PathPattern) -> Self {
        Self {
            path,
            methods: Vec::new(),
            requires_secure_channel: false,
            ips: Vec::new(),
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_methods(mut self, methods: &[Method]) -> Self {
        self.methods = methods.to_vec();
        self
    }

    #[must_use]
    pub fn requires_secure_channel(mut self, secure: bool) -> Self {
        self.requires_secure_channel = secure;
        self
    }

    #[must_use]
    pub fn with_ips(mut self, ips: Vec<IpNetwork>) -> Self {
        self.ips = ips;
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(ToString::to_string).collect();
        self
    }

    fn allows_address(&self, addr: Option<IpAddr>) -> bool {
        if self.ips.is_empty() {
            return true;
        }
        let Some(addr) = addr.map(|addr| addr.to_canonical()) else {
            return false;
        };
        self.ips.iter().any(|network| network.contains(addr))
    }
}

/// Role `A` implies roles `B, C, ...`, transitively.
#[derive(Clone, Debug, Default)]
pub struct RoleHierarchy {
    implied: HashMap<String, Vec<String>>,
}

impl RoleHierarchy {
    #[must_use]
    pub fn new(implied: HashMap<String, Vec<String>>) -> Self {
        Self { implied }
    }

    /// Every role reachable from `roles`, including themselves.
    #[must_use]
    pub fn reachable_roles(&self, roles: &[String]) -> HashSet<String> {
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = roles.iter().map(String::as_str).collect();
        while let Some(role) = queue.pop_front() {
            if !reachable.insert(role.to_string()) {
                continue;
            }
            if let Some(children) = self.implied.get(role) {
                queue.extend(children.iter().map(String::as_str));
            }
        }
        reachable
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessControlEnforcer {
    rules: Vec<AccessRule>,
    hierarchy: RoleHierarchy,
}

impl AccessControlEnforcer {
    #[must_use]
    pub fn new(rules: Vec<AccessRule>, hierarchy: RoleHierarchy) -> Self {
        Self { rules, hierarchy }
    }

    #[must_use]
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    #[must_use]
    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// Apply the first rule matching the request path.
    ///
    /// # Errors
    /// Returns the reason the matching rule denied the request.
    pub fn enforce(
        &self,
        request: &SecurityRequest,
        token: Option<&Token>,
    ) -> Result<(), AccessDeniedError> {
        let Some(rule) = self.rules.iter().find(|rule| rule.path.matches(request.path())) else {
            return Ok(());
        };
        debug!(path = %request.path(), rule = %rule.path, "Access rule matched");

        if !rule.methods.is_empty() && !rule.methods.contains(request.method()) {
            return Err(AccessDeniedError::MethodNotAllowed(
                request.method().to_string(),
            ));
        }
        if rule.requires_secure_channel && !request.is_secure() {
            return Err(AccessDeniedError::InsecureChannel);
        }
        if !rule.allows_address(request.client_addr()) {
            warn!(path = %request.path(), "Access denied for caller address");
            return Err(AccessDeniedError::AddressNotAllowed);
        }
        self.enforce_roles(token, &rule.roles)
    }

    /// Require any one of `roles`, independent of the path rules.
    ///
    /// # Errors
    /// Returns `Unauthenticated` without a full token and `MissingRole` when
    /// none of the roles is reachable.
    pub fn enforce_roles<S: AsRef<str>>(
        &self,
        token: Option<&Token>,
        roles: &[S],
    ) -> Result<(), AccessDeniedError> {
        if roles.is_empty() || roles.iter().any(|role| role.as_ref() == PUBLIC_ACCESS) {
            return Ok(());
        }
        let Some(token) = token.filter(|token| token.is_fully_authenticated()) else {
            return Err(AccessDeniedError::Unauthenticated);
        };
        if roles.iter().any(|role| role.as_ref() == IS_AUTHENTICATED) {
            return Ok(());
        }
        let reachable = self.hierarchy.reachable_roles(token.roles());
        if roles.iter().any(|role| reachable.contains(role.as_ref())) {
            return Ok(());
        }
        Err(AccessDeniedError::MissingRole(
            roles.iter().map(|role| role.as_ref().to_string()).collect(),
        ))
    }
}
