use axum::{
    extract::{Extension, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    gatehouse::{
        middleware::{SecurityContext, SessionHandle},
        AppState,
    },
    security::{
        firewall::FirewallZone,
        session::{Session, FLASH_ERROR},
        token_store::TokenStore,
        two_factor::TwoFactorFlow,
    },
};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TwoFactorPage {
    pub user: String,
    pub check_path: String,
    pub cancel_path: String,
    pub code_parameter: String,
    pub error: Option<String>,
}

fn zone(state: &AppState, context: &SecurityContext) -> Option<FirewallZone> {
    let name = context.firewall.as_deref()?;
    state.kernel.orchestrator().firewalls().zone(name).cloned()
}

fn entry_point(zone: Option<&FirewallZone>) -> String {
    zone.and_then(|zone| zone.entry_point.clone())
        .unwrap_or_else(|| "/".to_string())
}

/// Second-factor form data while a login is pending.
pub async fn two_factor_form(
    State(state): State<AppState>,
    Extension(context): Extension<SecurityContext>,
    Extension(session): Extension<SessionHandle>,
) -> Response {
    let zone = zone(&state, &context);
    let mut session = session.lock();
    let Some(pending) = TokenStore::load_pending(&mut *session) else {
        return Redirect::to(&entry_point(zone.as_ref())).into_response();
    };
    let paths = zone.map(|zone| zone.two_factor).unwrap_or_default();
    Json(TwoFactorPage {
        user: pending.user().identifier.clone(),
        check_path: paths.check_path,
        cancel_path: paths.cancel_path,
        code_parameter: paths.code_parameter,
        error: session.take_flashes(FLASH_ERROR).pop(),
    })
    .into_response()
}

/// Abandon the pending login and go back to the entry point.
pub async fn two_factor_cancel(
    State(state): State<AppState>,
    Extension(context): Extension<SecurityContext>,
    Extension(session): Extension<SessionHandle>,
) -> Redirect {
    let zone = zone(&state, &context);
    if TwoFactorFlow::cancel(&mut *session.lock()).is_some() {
        info!(firewall = context.firewall.as_deref().unwrap_or("-"), "Pending login cancelled");
    }
    Redirect::to(&entry_point(zone.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::pattern::PathPattern;

    #[test]
    fn entry_point_defaults_to_root() {
        assert_eq!(entry_point(None), "/");
        let zone = FirewallZone::new("main", PathPattern::Prefix("/".into())).with_entry_point("/login");
        assert_eq!(entry_point(Some(&zone)), "/login");
    }
}
