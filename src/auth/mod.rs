//! Inbound request authentication.
//!
//! A [`Group`] holds an ordered list of [`Method`]s. For each request the group asks every
//! applicable method in turn and the first one that returns an identity wins. Methods that share
//! a transport can be grouped into a shortcut, whose members fail quietly so the next member gets
//! its turn. Nothing found means the request is anonymous.
mod chain;
pub mod credential;
mod error;
pub mod method;
mod middleware;
pub mod path;

use std::net::SocketAddr;

use async_trait::async_trait;
use hyper::http::request::Parts;
use tokio_util::sync::CancellationToken;

use crate::identity::{ResponseHint, User};
use crate::token::AccessTokenScope;

pub use chain::{Group, Link, Outcome};
pub use credential::{Credential, HeaderExt};
pub use error::Error;
pub use middleware::{apply_hints, Authenticator, Mode, Rejection, Resolution};

/// Where a method's confidence in an identity comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trust {
    /// The method checks the credential itself.
    SelfVerifying,
    /// The method believes a header set by an upstream proxy. Only safe when clients cannot
    /// reach the service except through that proxy.
    Perimeter,
}

/// Request data handed to every method.
pub struct AuthRequest<'a> {
    pub parts: &'a Parts,
    pub remote_addr: Option<SocketAddr>,
    pub cancel: CancellationToken,
}

impl<'a> AuthRequest<'a> {
    pub fn new(parts: &'a Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            parts,
            remote_addr,
            cancel: CancellationToken::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn remote(&self) -> String {
        self.remote_addr
            .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
    }
}

/// Identity produced by one method, before the chain stamps its name on it.
#[derive(Clone, Debug, Default)]
pub struct Verified {
    pub user: User,
    pub is_api_token: bool,
    pub scope: Option<AccessTokenScope>,
    pub skip_local_two_fa: bool,
    pub hints: Vec<ResponseHint>,
}

impl Verified {
    pub fn user(user: User) -> Self {
        Self {
            user,
            ..Self::default()
        }
    }

    pub fn api_token(user: User, scope: AccessTokenScope) -> Self {
        Self {
            user,
            is_api_token: true,
            scope: Some(scope),
            ..Self::default()
        }
    }
}

/// One credential verification strategy.
#[async_trait]
pub trait Method: Send + Sync {
    fn name(&self) -> &'static str;

    fn trust(&self) -> Trust {
        Trust::SelfVerifying
    }

    /// Cheap, side-effect free check whether the request carries anything for this method.
    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool;

    /// Called once before the first request. A failure disables the method.
    async fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn free(&self) {}

    /// `Ok(None)` means the method had nothing to say about this request.
    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error>;
}
