use secrecy::SecretString;

use crate::security::KernelSecrets;

/// Secrets collected from the command line or environment.
#[derive(Default)]
pub struct GlobalArgs {
    pub jwt_secret: Option<SecretString>,
    pub remember_me_secret: Option<SecretString>,
    pub oauth_client_secret: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(
        jwt_secret: Option<String>,
        remember_me_secret: Option<String>,
        oauth_client_secret: Option<String>,
    ) -> Self {
        Self {
            jwt_secret: jwt_secret.map(SecretString::from),
            remember_me_secret: remember_me_secret.map(SecretString::from),
            oauth_client_secret: oauth_client_secret.map(SecretString::from),
        }
    }

    #[must_use]
    pub fn into_secrets(self) -> KernelSecrets {
        KernelSecrets {
            jwt: self.jwt_secret,
            remember_me: self.remember_me_secret,
            oauth_client: self.oauth_client_secret,
        }
    }
}

fn redacted(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "***"
    } else {
        "unset"
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("jwt_secret", &redacted(self.jwt_secret.as_ref()))
            .field("remember_me_secret", &redacted(self.remember_me_secret.as_ref()))
            .field("oauth_client_secret", &redacted(self.oauth_client_secret.as_ref()))
            .finish()
    }
}
