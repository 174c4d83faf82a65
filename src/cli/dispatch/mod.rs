use crate::cli::{
    actions::{server::Args, Action},
    commands::{
        ARG_CONFIG, ARG_JWT_SECRET, ARG_OAUTH_CLIENT_SECRET, ARG_PORT, ARG_REMEMBER_ME_SECRET,
        ARG_SESSION_TTL, ARG_USERS,
    },
    globals::GlobalArgs,
};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let config = matches
        .get_one::<PathBuf>(ARG_CONFIG)
        .cloned()
        .context("missing required argument: --config")?;
    let users = matches.get_one::<PathBuf>(ARG_USERS).cloned();
    let session_ttl = matches
        .get_one::<u64>(ARG_SESSION_TTL)
        .copied()
        .unwrap_or(1800);

    let globals = GlobalArgs::new(
        matches.get_one::<String>(ARG_JWT_SECRET).cloned(),
        matches.get_one::<String>(ARG_REMEMBER_ME_SECRET).cloned(),
        matches.get_one::<String>(ARG_OAUTH_CLIENT_SECRET).cloned(),
    );

    Ok(Action::Server(Args {
        port,
        config,
        users,
        session_ttl,
        globals,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn test_handler_builds_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "gatehouse",
            "--config",
            "security.json",
            "--users",
            "users.json",
            "--remember-me-secret",
            "remember",
        ]);
        let Action::Server(args) = handler(&matches)?;
        assert_eq!(args.port, 8080);
        assert_eq!(args.config, PathBuf::from("security.json"));
        assert_eq!(args.users, Some(PathBuf::from("users.json")));
        assert_eq!(args.session_ttl, 1800);
        assert!(args.globals.remember_me_secret.is_some());
        assert!(args.globals.jwt_secret.is_none());
        Ok(())
    }
}
