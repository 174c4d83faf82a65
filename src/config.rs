//! Security configuration file.
//!
//! JSON, loaded once at startup. Firewalls are an ordered map because the
//! first matching zone wins; `serde_json` is built with `preserve_order` and
//! the zones are collected through a map visitor so declaration order and
//! duplicate names both survive until [`SecurityConfig::validate`].

use axum::http::Method;
use ipnetwork::IpNetwork;
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::security::{
    access_control::AccessRule,
    authenticator::{FormLoginSettings, API_KEY, FORM_LOGIN, HTTP_BASIC, JWT, OAUTH, REMEMBER_ME},
    brute_force::ThrottlePolicy,
    firewall::FirewallZone,
    pattern::{PathPattern, PatternError},
};

/// Strategy names understood by the built-in registry.
pub const KNOWN_AUTHENTICATORS: [&str; 6] = [FORM_LOGIN, HTTP_BASIC, JWT, API_KEY, REMEMBER_ME, OAUTH];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("firewall '{0}' is declared more than once")]
    DuplicateZone(String),
    #[error("firewall '{zone}' references unknown authenticator '{name}'")]
    UnknownAuthenticator { zone: String, name: String },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("invalid address or network '{0}'")]
    InvalidAddress(String),
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
    #[error("invalid channel '{0}', expected 'http' or 'https'")]
    InvalidChannel(String),
    #[error("unsupported JWT algorithm '{0}', expected HS256, HS384 or HS512")]
    InvalidAlgorithm(String),
    #[error("{0} secret is required by the configured firewalls")]
    MissingSecret(&'static str),
    #[error("oauth requires an introspection_url")]
    MissingIntrospectionUrl,
}

/// Zones in declaration order, duplicates kept for validation.
#[derive(Clone, Debug, Default)]
pub struct Firewalls(pub Vec<FirewallZone>);

impl<'de> Deserialize<'de> for Firewalls {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ZonesVisitor;

        impl<'de> Visitor<'de> for ZonesVisitor {
            type Value = Firewalls;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of firewall name to zone")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut zones = Vec::new();
                while let Some((name, mut zone)) = map.next_entry::<String, FirewallZone>()? {
                    zone.name = name;
                    zones.push(zone);
                }
                Ok(Firewalls(zones))
            }
        }

        deserializer.deserialize_map(ZonesVisitor)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccessRuleConfig {
    pub path: String,
    pub methods: Vec<String>,
    pub requires_channel: Option<String>,
    pub ips: Vec<String>,
    pub roles: Vec<String>,
}

impl AccessRuleConfig {
    /// # Errors
    /// Returns an error for unparsable patterns, methods, channels or networks.
    pub fn compile(&self) -> Result<AccessRule, ConfigError> {
        let methods = self
            .methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(method.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let secure = match self.requires_channel.as_deref() {
            None | Some("http" | "any") => false,
            Some("https") => true,
            Some(other) => return Err(ConfigError::InvalidChannel(other.to_string())),
        };
        let ips = self
            .ips
            .iter()
            .map(|ip| {
                IpNetwork::from_str(ip.trim()).map_err(|_| ConfigError::InvalidAddress(ip.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rule = AccessRule::new(PathPattern::parse(&self.path)?)
            .with_methods(&methods)
            .requires_secure_channel(secure)
            .with_ips(ips);
        rule.roles.clone_from(&self.roles);
        Ok(rule)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardBackend {
    File {
        directory: PathBuf,
    },
    Redis {
        url: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    /// Throttling off.
    None,
}

impl Default for GuardBackend {
    fn default() -> Self {
        Self::File {
            directory: std::env::temp_dir().join("gatehouse-brute-force"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BruteForceConfig {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub lockout_seconds: u64,
    pub backend: GuardBackend,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        let policy = ThrottlePolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            window_seconds: policy.window.as_secs(),
            lockout_seconds: policy.lockout.as_secs(),
            backend: GuardBackend::default(),
        }
    }
}

impl BruteForceConfig {
    #[must_use]
    pub fn policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: self.max_attempts,
            window: Duration::from_secs(self.window_seconds),
            lockout: Duration::from_secs(self.lockout_seconds),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpBasicConfig {
    pub realm: String,
}

impl Default for HttpBasicConfig {
    fn default() -> Self {
        Self {
            realm: "gatehouse".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub algorithm: String,
    pub identifier_claim: String,
    pub header: String,
    pub prefix: String,
    pub ttl_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: "HS256".to_string(),
            identifier_claim: "sub".to_string(),
            header: "authorization".to_string(),
            prefix: "Bearer".to_string(),
            ttl_seconds: 3600,
        }
    }
}

impl JwtConfig {
    /// # Errors
    /// Only the HMAC family is accepted.
    pub fn algorithm(&self) -> Result<jsonwebtoken::Algorithm, ConfigError> {
        match self.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => Ok(jsonwebtoken::Algorithm::HS256),
            "HS384" => Ok(jsonwebtoken::Algorithm::HS384),
            "HS512" => Ok(jsonwebtoken::Algorithm::HS512),
            _ => Err(ConfigError::InvalidAlgorithm(self.algorithm.clone())),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    pub header: String,
    pub query_parameter: Option<String>,
    /// key -> user identifier
    pub keys: HashMap<String, String>,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            header: "x-api-key".to_string(),
            query_parameter: None,
            keys: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RememberMeConfig {
    pub cookie_name: String,
    pub lifetime_seconds: u64,
    pub secure: bool,
}

impl Default for RememberMeConfig {
    fn default() -> Self {
        Self {
            cookie_name: "REMEMBERME".to_string(),
            lifetime_seconds: 14 * 24 * 3600,
            secure: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub introspection_url: Option<Url>,
    pub client_id: String,
    pub timeout_seconds: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            introspection_url: None,
            client_id: String::new(),
            timeout_seconds: 5,
        }
    }
}

impl OAuthConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TwoFactorConfig {
    pub issuer: String,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "gatehouse".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub firewalls: Firewalls,
    pub access_control: Vec<AccessRuleConfig>,
    pub role_hierarchy: HashMap<String, Vec<String>>,
    pub brute_force: BruteForceConfig,
    pub form_login: FormLoginSettings,
    pub http_basic: HttpBasicConfig,
    pub jwt: JwtConfig,
    pub api_key: ApiKeyConfig,
    pub remember_me: RememberMeConfig,
    pub oauth: OAuthConfig,
    pub two_factor: TwoFactorConfig,
    /// Honour `X-Forwarded-Proto` when deciding whether a request arrived
    /// over https. Enable only behind a proxy that sets the header.
    pub trust_forwarded_proto: bool,
}

impl SecurityConfig {
    /// # Errors
    /// Returns an error if the JSON does not describe a valid configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn zones(&self) -> &[FirewallZone] {
        &self.firewalls.0
    }

    /// Whether any zone lists `strategy`.
    #[must_use]
    pub fn uses(&self, strategy: &str) -> bool {
        self.zones()
            .iter()
            .any(|zone| zone.authenticators.iter().any(|name| name == strategy))
    }

    /// # Errors
    /// Returns an error for invalid access rules.
    pub fn access_rules(&self) -> Result<Vec<AccessRule>, ConfigError> {
        self.access_control.iter().map(AccessRuleConfig::compile).collect()
    }

    /// Reject duplicate zones, unknown strategies and invalid access rules.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for zone in self.zones() {
            if !seen.insert(zone.name.as_str()) {
                return Err(ConfigError::DuplicateZone(zone.name.clone()));
            }
            if let Some(name) = zone
                .authenticators
                .iter()
                .find(|name| !KNOWN_AUTHENTICATORS.contains(&name.as_str()))
            {
                return Err(ConfigError::UnknownAuthenticator {
                    zone: zone.name.clone(),
                    name: name.clone(),
                });
            }
        }
        self.access_rules()?;
        if self.uses(JWT) {
            self.jwt.algorithm()?;
        }
        if self.uses(OAUTH) && self.oauth.introspection_url.is_none() {
            return Err(ConfigError::MissingIntrospectionUrl);
        }
        Ok(())
    }
}
