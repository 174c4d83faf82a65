//! Per-request security state.
//!
//! Everything that changes while a single request is processed lives here so
//! the long-lived kernel stays immutable and shareable between requests.

use std::collections::HashMap;

use super::{request::SecurityRequest, token::Token, token_store::TokenStore};

#[derive(Debug)]
pub struct RequestContext {
    request: SecurityRequest,
    tokens: TokenStore,
    firewall: Option<String>,
    security_enabled: bool,
    cache_generation: u64,
    resolutions: HashMap<String, Option<usize>>,
}

impl RequestContext {
    #[must_use]
    pub fn new(request: SecurityRequest) -> Self {
        Self {
            request,
            tokens: TokenStore::new(),
            firewall: None,
            security_enabled: true,
            cache_generation: 0,
            resolutions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn request(&self) -> &SecurityRequest {
        &self.request
    }

    /// Replace the request; cached resolutions belong to the old one.
    pub fn set_request(&mut self, request: SecurityRequest) {
        self.request = request;
        self.resolutions.clear();
    }

    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.tokens.token()
    }

    pub fn tokens_mut(&mut self) -> &mut TokenStore {
        &mut self.tokens
    }

    #[must_use]
    pub fn into_token(mut self) -> Option<Token> {
        self.tokens.take()
    }

    #[must_use]
    pub fn firewall(&self) -> Option<&str> {
        self.firewall.as_deref()
    }

    pub fn set_firewall(&mut self, name: Option<String>) {
        self.firewall = name;
    }

    #[must_use]
    pub fn security_enabled(&self) -> bool {
        self.security_enabled
    }

    pub fn set_security_enabled(&mut self, enabled: bool) {
        self.security_enabled = enabled;
    }

    pub(crate) fn cached_resolution(&self, generation: u64, path: &str) -> Option<Option<usize>> {
        if generation != self.cache_generation {
            return None;
        }
        self.resolutions.get(path).copied()
    }

    pub(crate) fn cache_resolution(&mut self, generation: u64, path: String, index: Option<usize>) {
        if generation != self.cache_generation {
            self.resolutions.clear();
            self.cache_generation = generation;
        }
        self.resolutions.insert(path, index);
    }
}
