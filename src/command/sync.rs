use argh::FromArgs;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::{Context, Error};
use crate::token::ExternalAuthTokens;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "sync",
    description = "Run one synchronisation pass over every sync-enabled identity source"
)]
pub struct Options {}

pub struct Command<'a> {
    context: &'a Context,
}

impl<'a> Command<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self { context }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling synchronisation");
                ctrl_c.cancel();
            }
        });

        let result = self.context.sources.synchronize(&cancel).await;
        watcher.abort();
        result?;

        let stores = &self.context.stores;
        let external = ExternalAuthTokens::new(
            stores.external_auth_tokens.clone(),
            stores.sessions.clone(),
            stores.auth_tokens.clone(),
        );
        let collected = external.collect_garbage().await.map_err(|e| {
            Error::Initialization(format!("Unable to collect external auth tokens: {e}"))
        })?;

        let purged = self.context.auth_tokens.delete_expired().await.map_err(|e| {
            Error::Initialization(format!("Unable to purge expired auth tokens: {e}"))
        })?;
        info!(
            "Synchronisation finished, {purged} expired auth token(s) purged, \
             {collected} stale external binding(s) removed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::context::tests::config;

    #[tokio::test]
    async fn test_sync_without_sources_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let context = Context::build(config(dir.path(), "")).await.unwrap();

        assert!(Command::new(&context).run().await.is_ok());
    }
}
