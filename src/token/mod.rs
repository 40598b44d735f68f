//! Credentials this service issues itself: remember-me auth tokens, personal access tokens,
//! OAuth2 grants and the provider tokens bound to federated sessions.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{signing, store};

mod access_token;
mod auth_token;
mod external;
mod grant;
mod scope;

pub use access_token::{looks_like_access_token, AccessToken, AccessTokens};
pub use auth_token::{AuthToken, AuthTokens};
pub use external::{ExternalAuthToken, ExternalAuthTokens};
pub use grant::{Grant, GrantClaims, Grants, IssuedTokens, TokenKind};
pub use scope::{AccessTokenScope, ScopeCategory, ScopeLevel};

#[derive(Debug, PartialEq)]
pub enum Error {
    Malformed,
    /// Unknown id or past expiry. Callers cannot tell the two apart.
    Expired,
    /// The id exists but the secret does not match its stored hash.
    InvalidHash,
    NotFound,
    Revoked(String),
    InvalidScope(String),
    Signing(signing::Error),
    Store(store::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Malformed => write!(f, "malformed token"),
            Error::Expired => write!(f, "token expired or unknown"),
            Error::InvalidHash => write!(f, "token hash mismatch"),
            Error::NotFound => write!(f, "token not found"),
            Error::Revoked(reason) => write!(f, "token revoked: {reason}"),
            Error::InvalidScope(scope) => write!(f, "invalid access token scope: {scope}"),
            Error::Signing(err) => write!(f, "{err}"),
            Error::Store(err) => write!(f, "{err}"),
        }
    }
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        match error {
            store::Error::NotFound => Error::NotFound,
            error => {
                debug!("Token store error: {error}");
                Error::Store(error)
            }
        }
    }
}

impl From<signing::Error> for Error {
    fn from(error: signing::Error) -> Self {
        match error {
            signing::Error::Expired => Error::Expired,
            error => Error::Signing(error),
        }
    }
}

pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buffer);
    hex::encode(buffer)
}

pub(crate) fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub(crate) fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
