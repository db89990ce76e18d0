//! Authentication integration points.
//!
//! Token validation itself lives outside the engine behind the
//! [`Authenticator`] trait. This module decides what happens when an
//! endpoint declares required tokens: grant, 401 when no credentials were
//! supplied at all, 403 when credentials exist but do not carry the tokens.

use std::collections::{BTreeSet, HashMap};

use axum::http::{header, HeaderMap};

use crate::error::EngineError;

/// A logged-in principal bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub tokens: BTreeSet<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokens: BTreeSet::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.tokens.insert(token.into());
        self
    }

    /// True when every required token is held.
    pub fn has_all(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tokens.contains(t))
    }
}

/// Validates request credentials. Implemented outside the engine.
pub trait Authenticator: Send + Sync {
    /// Resolve the identity carried by the request headers, if any.
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity>;

    /// Value of the `WWW-Authenticate` challenge sent with 401 responses.
    fn challenge(&self) -> String {
        "Bearer".to_string()
    }
}

/// Bearer-token table, mostly useful for tests and small deployments.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, bearer: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(bearer.into(), identity);
        self
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        self.tokens.get(token).cloned()
    }
}

/// Whether the request carries any credentials at all.
pub fn credentials_supplied(headers: &HeaderMap) -> bool {
    headers.contains_key(header::AUTHORIZATION)
}

/// Decide access for an endpoint requiring `required` tokens.
pub fn authorize(
    required: &[String],
    identity: Option<&Identity>,
    credentials_supplied: bool,
) -> Result<(), EngineError> {
    if required.is_empty() {
        return Ok(());
    }
    match identity {
        Some(identity) if identity.has_all(required) => Ok(()),
        Some(identity) => Err(EngineError::Forbidden(format!(
            "'{}' lacks required tokens",
            identity.name
        ))),
        None if credentials_supplied => {
            Err(EngineError::Forbidden("invalid credentials".to_string()))
        }
        None => Err(EngineError::Unauthorized),
    }
}
