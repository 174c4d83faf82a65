use crate::{
    cli::globals::GlobalArgs,
    config::SecurityConfig,
    gatehouse::{self, AppState},
    security::{user::InMemoryUserProvider, KernelOptions, SecurityKernel},
};
use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub config: PathBuf,
    pub users: Option<PathBuf>,
    pub session_ttl: u64,
    pub globals: GlobalArgs,
}

/// Load the users and the security configuration, then serve.
///
/// # Errors
/// Returns an error if a file cannot be loaded, the kernel cannot be built,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let Args {
        port,
        config,
        users,
        session_ttl,
        globals,
    } = args;
    debug!("Global args: {:?}", globals);

    let provider = load_users(users.as_ref())?;
    let security = SecurityConfig::from_path(&config)
        .with_context(|| format!("Could not load security configuration {}", config.display()))?;

    log_startup(port, &config, &security, provider.len(), session_ttl);

    let options = KernelOptions {
        secrets: globals.into_secrets(),
        ..KernelOptions::default()
    };
    let kernel = SecurityKernel::from_config(&security, Arc::new(provider), options)
        .context("Could not build the security kernel")?;

    let state = AppState::new(Arc::new(kernel), Duration::from_secs(session_ttl));
    gatehouse::new(port, state).await
}

fn load_users(path: Option<&PathBuf>) -> Result<InMemoryUserProvider> {
    let Some(path) = path else {
        warn!("No user file given, every credential check will fail");
        return Ok(InMemoryUserProvider::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read user file {}", path.display()))?;
    InMemoryUserProvider::from_json(&json)
        .with_context(|| format!("Could not parse user file {}", path.display()))
}

fn log_startup(
    port: u16,
    config: &std::path::Path,
    security: &SecurityConfig,
    users: usize,
    session_ttl: u64,
) {
    let zones = security
        .zones()
        .iter()
        .map(|zone| zone.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let entries = [
        ("listen", format!("tcp:{port}")),
        ("config", config.display().to_string()),
        ("firewalls", zones),
        ("users", users.to_string()),
        ("session_ttl", format!("{session_ttl}s")),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "gatehouse {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
