//! Transport-neutral view of an inbound request.
//!
//! The security core only needs method, path, channel, headers, cookies,
//! parameters, and the socket-level caller address. Forwarding headers are
//! never consulted for the caller address.

use axum::http::{
    header::{self, HeaderName},
    request::Parts,
    uri::Scheme,
    HeaderMap, HeaderValue, Method,
};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Clone, Debug)]
pub struct SecurityRequest {
    method: Method,
    path: String,
    query_string: Option<String>,
    secure: bool,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    query: HashMap<String, String>,
    form: HashMap<String, String>,
    client_addr: Option<IpAddr>,
}

impl SecurityRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_string: None,
            secure: false,
            headers: HeaderMap::new(),
            cookies: HashMap::new(),
            query: HashMap::new(),
            form: HashMap::new(),
            client_addr: None,
        }
    }

    /// Build a request view from HTTP parts and an already buffered body.
    ///
    /// The body is only parsed when it is `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn from_parts(parts: &Parts, body: &[u8], client_addr: Option<IpAddr>) -> Self {
        let query_string = parts.uri.query().map(str::to_string);
        let query = query_string
            .as_deref()
            .map(|query| parse_urlencoded(query.as_bytes()))
            .unwrap_or_default();

        let form = if is_form_content(&parts.headers) {
            parse_urlencoded(body)
        } else {
            HashMap::new()
        };

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query_string,
            secure: parts.uri.scheme() == Some(&Scheme::HTTPS),
            cookies: parse_cookies(&parts.headers),
            headers: parts.headers.clone(),
            query,
            form,
            client_addr,
        }
    }

    /// Treat `X-Forwarded-Proto: https` as a secure channel. Only for
    /// deployments behind a TLS-terminating proxy that sets the header itself.
    #[must_use]
    pub fn trust_forwarded_proto(mut self, trusted: bool) -> Self {
        if trusted && forwarded_https(&self.headers) {
            self.secure = true;
        }
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            if name == header::COOKIE {
                self.headers.insert(name, value);
                self.cookies = parse_cookies(&self.headers);
            } else {
                self.headers.insert(name, value);
            }
        }
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_query_param(mut self, name: &str, value: &str) -> Self {
        let mut query =
            url::form_urlencoded::Serializer::new(self.query_string.take().unwrap_or_default());
        query.append_pair(name, value);
        self.query_string = Some(query.finish());
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_form_param(mut self, name: &str, value: &str) -> Self {
        self.form.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path plus query string, used when remembering where to send the user back.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.query_string.as_deref() {
            Some(query) if !query.is_empty() => format!("{}?{query}", self.path),
            _ => self.path.clone(),
        }
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    /// Body parameter first, then query parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.form_param(name).or_else(|| self.query_param(name))
    }

    #[must_use]
    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    #[must_use]
    pub fn client_addr_string(&self) -> Option<String> {
        self.client_addr.map(|addr| addr.to_string())
    }
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

fn is_form_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim()
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
}

fn parse_urlencoded(input: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(input)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for header in headers.get_all(header::COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let key = key.trim();
            if !key.is_empty() {
                cookies.insert(key.to_string(), val.trim().to_string());
            }
        }
    }
    cookies
}
