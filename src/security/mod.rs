//! Synchronous security core.
//!
//! [`kernel::SecurityKernel`] is the long-lived entry point; per-request
//! state lives in [`context::RequestContext`] and the caller's [`session::Session`].

pub mod access_control;
pub mod authenticator;
pub mod brute_force;
pub mod context;
pub mod csrf;
pub mod error;
pub mod firewall;
pub mod kernel;
pub mod orchestrator;
pub mod password;
pub mod pattern;
pub mod request;
pub mod response;
pub mod session;
pub mod token;
pub mod token_store;
pub mod two_factor;
pub mod user;
pub mod utils;

pub use self::error::{AccessDeniedError, AuthenticationError, SecurityError};
pub use self::kernel::{KernelOptions, KernelOutcome, KernelSecrets, SecurityKernel};
pub use self::request::SecurityRequest;
pub use self::response::{Decision, SecurityResponse};
pub use self::token::Token;
