use std::fmt;

use tracing::warn;

use crate::{cache, store};

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The backend answered but did not accept the login. Deliberately does not say whether
    /// the name or the secret was wrong.
    UserNotFound(String),
    ProhibitLogin(String),
    SourceNotFound(i64),
    SourceNotActive(String),
    AlreadyExists(String),
    InUse(i64),
    Unsupported(String),
    /// Dial, TLS or protocol failure talking to the backend.
    Unavailable(String),
    Configuration(String),
    Provider(String),
    InvalidGrant,
    Cancelled,
    Store(store::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UserNotFound(login) => write!(f, "User '{login}' does not exist"),
            Error::ProhibitLogin(name) => write!(f, "User '{name}' is not allowed to sign in"),
            Error::SourceNotFound(id) => write!(f, "Identity source {id} does not exist"),
            Error::SourceNotActive(name) => write!(f, "Identity source '{name}' is not active"),
            Error::AlreadyExists(name) => write!(f, "Identity source '{name}' already exists"),
            Error::InUse(id) => write!(f, "Identity source {id} is still in use"),
            Error::Unsupported(what) => write!(f, "Unsupported: {what}"),
            Error::Unavailable(err) => write!(f, "Identity backend unavailable: {err}"),
            Error::Configuration(err) => write!(f, "Invalid identity source configuration: {err}"),
            Error::Provider(err) => write!(f, "OAuth2 provider error: {err}"),
            Error::InvalidGrant => write!(f, "OAuth2 provider rejected the grant"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Store(err) => write!(f, "{err}"),
        }
    }
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        Error::Store(error)
    }
}

impl From<cache::Error> for Error {
    fn from(error: cache::Error) -> Self {
        warn!("Cache error during federated sign-in: {error}");
        Error::Unavailable(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Error::Provider(format!("Unexpected response: {error}"))
        } else {
            Error::Unavailable(error.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}
