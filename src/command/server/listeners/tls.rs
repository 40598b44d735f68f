use crate::command::server::error::Error;
use crate::command::server::listeners::{accept, build_listener};
use crate::command::server::serve_request;
use crate::command::server::ServerContext;
use crate::configuration::{self, ServerConfig, ServerTlsConfig};
use hyper_util::rt::TokioIo;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

pub struct TlsListener {
    binding_address: SocketAddr,
    tls_acceptor: TlsAcceptor,
    context: Arc<ServerContext>,
    timeouts: [Duration; 2],
}

impl TlsListener {
    pub fn new(
        config: &ServerConfig,
        tls: &ServerTlsConfig,
        context: Arc<ServerContext>,
    ) -> Result<Self, configuration::Error> {
        let binding_address = SocketAddr::new(config.bind_address, config.port);
        let tls_acceptor = build_tls_acceptor(tls)?;
        let timeouts = [
            Duration::from_secs(config.query_timeout),
            Duration::from_secs(config.query_timeout_grace_period),
        ];

        Ok(Self {
            binding_address,
            tls_acceptor,
            context,
            timeouts,
        })
    }

    pub async fn serve(&self) -> Result<(), Error> {
        info!("Listening on {} (TLS)", self.binding_address);
        let listener = build_listener(self.binding_address).await?;

        loop {
            let (tcp, remote_address) = accept(&listener).await?;

            let tls = match self.tls_acceptor.accept(tcp).await {
                Ok(tls) => tls,
                Err(error) => {
                    debug!("TLS handshake with {remote_address} failed: {error}");
                    continue;
                }
            };

            let stream = TokioIo::new(tls);
            tokio::spawn(Box::pin(serve_request(
                stream,
                Arc::clone(&self.context),
                self.timeouts,
                remote_address,
            )));
        }
    }
}

fn build_tls_acceptor(tls_config: &ServerTlsConfig) -> Result<TlsAcceptor, configuration::Error> {
    debug!("Detected TLS configuration");
    let server_certs = CertificateDer::pem_file_iter(&tls_config.server_certificate_bundle)?
        .collect::<Result<_, _>>()?;
    let server_key = PrivateKeyDer::from_pem_file(&tls_config.server_private_key)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(server_certs, server_key)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
