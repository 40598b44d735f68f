use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{Cache, Error};

pub async fn retrieve<T>(cache: &dyn Cache, key: &str) -> Result<Option<T>, Error>
where
    T: DeserializeOwned,
{
    let Some(cached) = cache.retrieve_value(key).await? else {
        return Ok(None);
    };

    match serde_json::from_str::<T>(&cached) {
        Ok(value) => {
            debug!("Using cached value for key: {key}");
            Ok(Some(value))
        }
        Err(e) => {
            warn!("Failed to deserialize cached value for key {key}: {e}");
            Err(Error::Execution(format!(
                "Failed to deserialize cached value: {e}"
            )))
        }
    }
}

pub async fn store<T>(cache: &dyn Cache, key: &str, value: &T, ttl: u64) -> Result<(), Error>
where
    T: Serialize,
{
    let serialized = serde_json::to_string(value).map_err(|e| {
        warn!("Failed to serialize value for caching for key {key}: {e}");
        Error::Execution(format!("Failed to serialize value for caching: {e}"))
    })?;

    cache.store_value(key, &serialized, ttl).await
}
