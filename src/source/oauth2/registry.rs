use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::source::oauth2::{Config, Provider};
use crate::source::Error;

/// Providers of the active OAuth2 sources, keyed by source name.
///
/// Registration and reset take the write lock; sign-in flows only read.
pub struct Registry {
    providers: RwLock<HashMap<String, Arc<Provider>>>,
    client: Client,
    cache: Arc<dyn Cache>,
    callback_base: String,
}

impl Registry {
    /// `callback_base` is the public URL under which `/<source>/callback` is served.
    pub fn new(cache: Arc<dyn Cache>, callback_base: &str) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("forge-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            providers: RwLock::new(HashMap::new()),
            client,
            cache,
            callback_base: callback_base.trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(&self, name: &str, config: &Config) -> Result<(), Error> {
        let provider = Provider::build(name, config, &self.client, &*self.cache).await?;
        self.providers
            .write()
            .await
            .insert(name.to_string(), Arc::new(provider));
        info!("Registered OAuth2 provider '{name}' ({})", config.provider);
        Ok(())
    }

    pub async fn remove(&self, name: &str) {
        if self.providers.write().await.remove(name).is_some() {
            debug!("Removed OAuth2 provider '{name}'");
        }
    }

    pub async fn clear(&self) {
        self.providers.write().await.clear();
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Provider>, Error> {
        self.providers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SourceNotActive(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn redirect_uri(&self, name: &str) -> String {
        format!("{}/{name}/callback", self.callback_base)
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn cache(&self) -> &dyn Cache {
        &*self.cache
    }
}
