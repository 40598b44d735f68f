use std::sync::Arc;

use argh::FromArgs;
use tracing::info;

mod error;
mod handlers;
mod listeners;
mod router;
mod server_context;

use crate::command::Context;
use crate::configuration;
use listeners::insecure::InsecureListener;
use listeners::tls::TlsListener;

pub use error::Error;
pub(crate) use handlers::serve_request;
pub use server_context::ServerContext;

pub enum ServiceListener {
    Insecure(InsecureListener),
    Secure(TlsListener),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "serve",
    description = "Run the authentication server"
)]
pub struct Options {}

pub struct Command {
    listener: ServiceListener,
    context: Arc<ServerContext>,
}

impl Command {
    pub async fn new(context: &Context) -> Result<Command, configuration::Error> {
        let server_config = &context.config.server;
        let server_context = Arc::new(ServerContext::new(context).await);

        let listener = match &server_config.tls {
            Some(tls) => ServiceListener::Secure(TlsListener::new(
                server_config,
                tls,
                server_context.clone(),
            )?),
            None => ServiceListener::Insecure(InsecureListener::new(
                server_config,
                server_context.clone(),
            )),
        };

        Ok(Command {
            listener,
            context: server_context,
        })
    }

    pub async fn run(&self) -> Result<(), Error> {
        let serve = async {
            match &self.listener {
                ServiceListener::Insecure(listener) => listener.serve().await,
                ServiceListener::Secure(listener) => listener.serve().await,
            }
        };

        let result = tokio::select! {
            result = serve => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        };

        self.context.shutdown().await;
        result
    }
}
