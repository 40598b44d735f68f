use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

use crate::cache::{Cache, Error};

const CLEANUP_EVERY: usize = 1000;

#[derive(Debug)]
pub struct Backend {
    store: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    counter: Arc<AtomicUsize>,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    pub fn new() -> Self {
        info!("Using in-memory cache store");
        Backend {
            store: Arc::new(RwLock::new(HashMap::new())),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn tick(&self) {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        if count % CLEANUP_EVERY == 0 {
            let mut store = self.store.write().await;
            let now = Instant::now();
            store.retain(|_, &mut (_, expiry)| expiry > now);
        }
    }
}

#[async_trait]
impl Cache for Backend {
    async fn store_value(&self, key: &str, value: &str, expires_in: u64) -> Result<(), Error> {
        self.tick().await;

        let mut store = self.store.write().await;
        store.insert(
            key.to_string(),
            (
                value.to_string(),
                Instant::now() + Duration::from_secs(expires_in),
            ),
        );
        Ok(())
    }

    async fn retrieve_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.tick().await;

        let store = self.store.read().await;
        match store.get(key) {
            Some((value, expiry)) if *expiry > Instant::now() => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn take_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.tick().await;

        let mut store = self.store.write().await;
        match store.remove(key) {
            Some((value, expiry)) if expiry > Instant::now() => Ok(Some(value)),
            _ => Ok(None),
        }
    }
}
