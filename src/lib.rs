//! # Gatehouse
//!
//! Firewall-zone authentication and access control.
//!
//! Every request is matched to a firewall zone by path. Inside a zone the
//! security layer logs out, restores a session token, completes a pending
//! second factor, or tries the zone's credential strategies in order
//! (form login, HTTP basic, JWT, API key, remember-me, delegated OAuth).
//! Delegated requests then pass the first matching access rule.
//!
//! Failed attempts are throttled in a sliding window by a file or Redis
//! backed guard; both keep only hashed keys.
//!
//! The [`security`] module is the synchronous core; [`gatehouse`] serves it
//! over axum and [`cli`] wires configuration, secrets and telemetry.

pub mod cli;
pub mod config;
pub mod gatehouse;
pub mod security;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
