use axum::{
    extract::Extension,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

use crate::{gatehouse::middleware::SecurityContext, security::Token};

/// Who is calling, as seen by the security layer.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct PrincipalSummary {
    pub authenticated: bool,
    pub user: Option<String>,
    pub roles: Vec<String>,
    pub firewall: Option<String>,
    pub strategy: Option<String>,
}

impl PrincipalSummary {
    #[must_use]
    pub fn new(token: Option<&Token>, firewall: Option<&str>) -> Self {
        let firewall = firewall.map(ToString::to_string);
        match token.filter(|token| token.is_fully_authenticated()) {
            Some(token) => Self {
                authenticated: true,
                user: Some(token.user().identifier.clone()),
                roles: token.roles().to_vec(),
                firewall,
                strategy: Some(token.principal().strategy.clone()),
            },
            None => Self {
                firewall,
                ..Self::default()
            },
        }
    }
}

fn summary(context: &SecurityContext) -> PrincipalSummary {
    PrincipalSummary::new(context.token.as_ref(), context.firewall.as_deref())
}

pub async fn home(Extension(context): Extension<SecurityContext>) -> impl IntoResponse {
    Json(summary(&context))
}

pub async fn me(Extension(context): Extension<SecurityContext>) -> impl IntoResponse {
    Json(summary(&context))
}

pub async fn admin(Extension(context): Extension<SecurityContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "area": "admin",
        "principal": summary(&context),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{token::TokenMetadata, user::User};

    #[test]
    fn pending_tokens_are_anonymous() {
        let user = User::new("mfa").with_roles(&["ROLE_USER"]);
        let pending = Token::pending(&user, "memory", "main", "form_login");
        let summary = PrincipalSummary::new(Some(&pending), Some("main"));
        assert!(!summary.authenticated);
        assert_eq!(summary.user, None);
        assert_eq!(summary.firewall.as_deref(), Some("main"));

        let token = Token::authenticated(&user, "memory", "main", "form_login", TokenMetadata::None);
        let summary = PrincipalSummary::new(Some(&token), Some("main"));
        assert!(summary.authenticated);
        assert_eq!(summary.roles, vec!["ROLE_USER".to_string()]);
        assert_eq!(summary.strategy.as_deref(), Some("form_login"));
    }
}
