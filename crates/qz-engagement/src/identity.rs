//! Viewer identity resolution
//!
//! The acting viewer is decoded from a locally persisted bearer token. The
//! resolver never fails: any problem with the credential degrades to an
//! anonymous viewer.

use crate::error::IdentityError;
use crate::types::Identity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::sync::Arc;

/// Where the current credential is read from
pub trait CredentialSource: Debug + Send + Sync {
    /// Raw token, `None` when nobody is signed in
    fn load(&self) -> Option<String>;
}

/// In-memory credential, swapped on sign-in and sign-out
#[derive(Debug, Default)]
pub struct SessionCredential {
    token: RwLock<Option<String>>,
}

impl SessionCredential {
    /// Create an empty (signed-out) credential
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a credential holding `token`
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Store a new token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Forget the token
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl CredentialSource for SessionCredential {
    fn load(&self) -> Option<String> {
        self.token.read().clone()
    }
}

/// Resolves the acting viewer from a credential source
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    source: Arc<dyn CredentialSource>,
}

impl IdentityResolver {
    /// Create resolver over a credential source
    #[inline]
    #[must_use]
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }

    /// Current viewer, or `None` for anonymous
    #[must_use]
    pub fn resolve(&self) -> Option<Identity> {
        let Some(token) = self.source.load() else {
            tracing::debug!("no credential stored, tracking anonymously");
            return None;
        };
        match decode_token(&token) {
            Ok(identity) => Some(identity),
            Err(err) => {
                tracing::warn!("credential unusable, tracking anonymously: {}", err);
                None
            }
        }
    }
}

/// Decode the identity carried in a `header.payload.signature` token
///
/// The signature is not verified; the server does that on every request.
///
/// # Errors
/// - `IdentityError::Missing` for an empty token
/// - `IdentityError::Malformed` when the token is not three segments
/// - `IdentityError::Encoding` / `IdentityError::Payload` for an undecodable payload
/// - `IdentityError::NoSubject` when neither username nor id is present
pub fn decode_token(token: &str) -> Result<Identity, IdentityError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(IdentityError::Missing);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(IdentityError::Malformed(segments.len()));
    }

    let bytes = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('='))?;
    let payload: Value =
        serde_json::from_slice(&bytes).map_err(|e| IdentityError::Payload(e.to_string()))?;
    let Value::Object(claims) = payload else {
        return Err(IdentityError::Payload("not an object".to_string()));
    };

    let username = claims
        .get("username")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let user_id = ["user_id", "id"]
        .iter()
        .find_map(|field| integer_claim(&claims, field));

    if username.is_none() && user_id.is_none() {
        return Err(IdentityError::NoSubject);
    }

    Ok(Identity { username, user_id })
}

fn integer_claim(claims: &Map<String, Value>, field: &str) -> Option<i64> {
    match claims.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
