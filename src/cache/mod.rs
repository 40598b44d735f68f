use std::any::Any;
use std::fmt::Debug;

use async_trait::async_trait;

mod config;
mod error;
mod json;
pub mod memory;
pub mod redis;

pub use config::Config;
pub use error::Error;
pub use json::{retrieve, store};

/// Key/value cache with per-entry expiry.
///
/// Used for OpenID discovery documents, provider key sets and the single-use OAuth2 `state`
/// values issued by the federation flow.
#[async_trait]
pub trait Cache: Any + Debug + Send + Sync {
    /// Store a value under `key` for `expires_in` seconds.
    async fn store_value(&self, key: &str, value: &str, expires_in: u64) -> Result<(), Error>;

    /// Retrieve a value that has not expired yet.
    async fn retrieve_value(&self, key: &str) -> Result<Option<String>, Error>;

    /// Retrieve a value and remove it in the same step.
    ///
    /// A second call with the same key returns `Ok(None)`.
    async fn take_value(&self, key: &str) -> Result<Option<String>, Error>;
}
