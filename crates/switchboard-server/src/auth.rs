//! Bearer credential verification.
//!
//! The server never interprets credentials itself: an [`IdentityVerifier`]
//! turns a token into an opaque [`Identity`]. Handlers take the
//! [`Authenticated`] extractor, which reads the token from the
//! `Authorization: Bearer` header or, for `EventSource` clients that cannot
//! set headers, the `token` query parameter.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;
use switchboard_core::Identity;
use switchboard_settings::AuthSettings;
use tracing::debug;

use crate::error::ApiError;

/// Credential verification failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No token in the header or query string.
    #[error("missing bearer credential")]
    MissingCredential,
    /// The verifier did not recognise the token.
    #[error("invalid bearer credential")]
    InvalidCredential,
}

/// Resolves a bearer token to the identity it belongs to.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token`.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Shared verifier as stored in router state.
pub type SharedVerifier = Arc<dyn IdentityVerifier>;

/// Fixed token table, typically loaded from settings.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    /// Builds a table from `(token, identity)` pairs.
    pub fn new<I, T, U>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, identity)| (token.into(), Identity::new(identity)))
                .collect(),
        }
    }

    /// Builds a table from the configured tokens.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.tokens.iter().map(|(t, i)| (t.as_str(), i.as_str())))
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull the raw token out of the request, header first.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    from_header
        .or(query_token.filter(|t| !t.is_empty()))
        .map(str::to_owned)
}

/// The verified identity of the caller.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    SharedVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();
        let token = extract_token(&parts.headers, query.token.as_deref())
            .ok_or(AuthError::MissingCredential)?;
        let verifier = SharedVerifier::from_ref(state);
        match verifier.verify(&token).await {
            Ok(identity) => Ok(Self(identity)),
            Err(error) => {
                debug!(path = %parts.uri.path(), error = %error, "rejected credential");
                Err(error.into())
            }
        }
    }
}
