use std::fmt;

use tracing::debug;

use crate::{signing, source, store, token};

/// Failure of one method. `Ok(None)` from a method, not an error, means "not for me".
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The credential could not be parsed.
    Malformed(String),
    /// The backend was reached but nothing matched. Never says whether the name or the secret
    /// was wrong.
    NotFound,
    /// Network, dial or store failure. The chain moves on to the next method.
    Unavailable(String),
    /// Signature, hash or certificate chain mismatch.
    Invalid(String),
    Expired,
    /// A known token id presented with the wrong secret, possibly a stolen and rotated token.
    InvalidHash,
    /// The account exists but may not sign in.
    Prohibited(String),
    /// Another negotiation round trip is needed; carries the base64 continuation token.
    Challenge(String),
    Timeout,
    Internal(String),
}

impl Error {
    /// Outcome label used by the attempts metric.
    pub fn metric_result(&self) -> &'static str {
        match self {
            Error::Unavailable(_) | Error::Timeout => "unavailable",
            Error::Challenge(_) => "challenge",
            _ => "failed",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Malformed(err) => write!(f, "Malformed credential: {err}"),
            Error::NotFound => write!(f, "Identity not found"),
            Error::Unavailable(err) => write!(f, "Backend unavailable: {err}"),
            Error::Invalid(err) => write!(f, "Invalid credential: {err}"),
            Error::Expired => write!(f, "Token expired"),
            Error::InvalidHash => write!(f, "Token hash mismatch"),
            Error::Prohibited(name) => write!(f, "User '{name}' is not allowed to sign in"),
            Error::Challenge(_) => write!(f, "Negotiation continues"),
            Error::Timeout => write!(f, "Authentication timed out"),
            Error::Internal(err) => write!(f, "Internal error: {err}"),
        }
    }
}

impl From<source::Error> for Error {
    fn from(error: source::Error) -> Self {
        match error {
            source::Error::UserNotFound(_) | source::Error::SourceNotActive(_) => Error::NotFound,
            source::Error::ProhibitLogin(name) => Error::Prohibited(name),
            source::Error::Unavailable(err) => Error::Unavailable(err),
            source::Error::Cancelled => Error::Timeout,
            source::Error::InvalidGrant => Error::Invalid("grant rejected".to_string()),
            source::Error::Store(error) => error.into(),
            error => Error::Internal(error.to_string()),
        }
    }
}

impl From<token::Error> for Error {
    fn from(error: token::Error) -> Self {
        match error {
            token::Error::Malformed => Error::Malformed("token".to_string()),
            token::Error::Expired => Error::Expired,
            token::Error::InvalidHash => Error::InvalidHash,
            token::Error::NotFound => Error::NotFound,
            token::Error::Revoked(reason) => Error::Invalid(reason),
            token::Error::InvalidScope(scope) => Error::Invalid(format!("scope {scope}")),
            token::Error::Signing(error) => error.into(),
            token::Error::Store(error) => error.into(),
        }
    }
}

impl From<signing::Error> for Error {
    fn from(error: signing::Error) -> Self {
        match error {
            signing::Error::Expired => Error::Expired,
            signing::Error::InvalidToken(err) => Error::Invalid(err),
            signing::Error::UnknownKey(kid) => Error::Invalid(format!("unknown key id {kid:?}")),
            error => Error::Internal(error.to_string()),
        }
    }
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        match error {
            store::Error::NotFound => Error::NotFound,
            error => {
                debug!("Store error during authentication: {error}");
                Error::Unavailable(error.to_string())
            }
        }
    }
}
