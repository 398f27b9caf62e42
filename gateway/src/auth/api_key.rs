use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};

use crate::config::AuthConfig;

const KEY_PREFIX: &str = "Key ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("API Key is required")]
    MissingCredential,
    #[error("Invalid API Key")]
    MalformedCredential,
    #[error("Invalid API Key")]
    InvalidCredential,
}

impl AuthError {
    /// Operator-facing reason; the `Display` text is what callers see.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing Authorization header",
            AuthError::MalformedCredential => "Authorization header is not of the form `Key <value>`",
            AuthError::InvalidCredential => "API key does not match",
        }
    }
}

/// Pull the key out of an `Authorization: Key <value>` header value.
pub fn extract_api_key(authorization: &str) -> Result<&str, AuthError> {
    match authorization.strip_prefix(KEY_PREFIX) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AuthError::MalformedCredential),
    }
}

/// Shared-secret check used by both the HTTP middleware and websocket sessions.
#[derive(Debug, Clone)]
pub struct ApiKeyGate {
    secret: String,
    exempt_paths: Vec<String>,
}

impl ApiKeyGate {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.secret().to_string(),
            exempt_paths: config.exempt_paths().to_vec(),
        }
    }

    /// Whether a one-shot request to `path` skips authentication.
    ///
    /// `/docs` exempts `/docs` and `/docs/...`, not `/docsearch`.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| {
            let exempt = exempt.trim_end_matches('/');
            match path.strip_prefix(exempt) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        })
    }

    /// Validate a raw `Authorization` header value.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        let authorization = authorization.ok_or(AuthError::MissingCredential)?;
        let key = extract_api_key(authorization)?;

        if key == self.secret {
            Ok(())
        } else {
            Err(AuthError::InvalidCredential)
        }
    }

    pub fn authenticate_header(&self, authorization: Option<&HeaderValue>) -> Result<(), AuthError> {
        let authorization = authorization
            .map(|value| value.to_str().map_err(|_| AuthError::MalformedCredential))
            .transpose()?;
        self.authenticate(authorization)
    }

    pub fn authenticate_headers(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        self.authenticate_header(headers.get(AUTHORIZATION))
    }
}
