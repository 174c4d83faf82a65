pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use std::path::PathBuf;

pub const ARG_PORT: &str = "port";
pub const ARG_CONFIG: &str = "config";
pub const ARG_USERS: &str = "users";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_REMEMBER_ME_SECRET: &str = "remember-me-secret";
pub const ARG_OAUTH_CLIENT_SECRET: &str = "oauth-client-secret";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("gatehouse")
        .about("Firewall-zone authentication and access control")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("GATEHOUSE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long("config")
                .help("Security configuration file (JSON)")
                .env("GATEHOUSE_CONFIG")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new(ARG_USERS)
                .short('u')
                .long("users")
                .help("In-memory user file (JSON array)")
                .env("GATEHOUSE_USERS")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl")
                .help("Idle session lifetime in seconds")
                .default_value("1800")
                .env("GATEHOUSE_SESSION_TTL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long("jwt-secret")
                .help("HMAC secret for bearer JWTs")
                .env("GATEHOUSE_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REMEMBER_ME_SECRET)
                .long("remember-me-secret")
                .help("HMAC secret for remember-me cookies")
                .env("GATEHOUSE_REMEMBER_ME_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_OAUTH_CLIENT_SECRET)
                .long("oauth-client-secret")
                .help("Client secret used to call the token introspection endpoint")
                .env("GATEHOUSE_OAUTH_CLIENT_SECRET")
                .hide_env_values(true),
        );

    logging::with_args(command)
}
