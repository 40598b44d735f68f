//! Client-side TLS for outbound connections to identity backends.

use std::fmt::Display;
use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::{error, info, warn};

pub fn load_certificate_bundle<T: AsRef<Path> + Display>(
    path: T,
) -> io::Result<Vec<CertificateDer<'static>>> {
    info!("Loading certificate bundle from {path}");
    CertificateDer::pem_file_iter(path)
        .map_err(|err| {
            error!("Error opening certificate bundle: {err:?}");
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Error opening certificate bundle",
            )
        })?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            error!("Error reading certificate bundle: {err:?}");
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "Error reading certificate bundle",
            )
        })
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Client configuration trusting `ca_bundle`, or the platform roots when absent. With
/// `skip_verify` the server certificate is accepted as presented.
pub fn client_config(skip_verify: bool, ca_bundle: Option<&str>) -> io::Result<Arc<ClientConfig>> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    if skip_verify {
        warn!("TLS certificate verification is disabled for this connection");
        let config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }

    let certs = match ca_bundle {
        Some(bundle) => load_certificate_bundle(bundle)?,
        None => rustls_native_certs::load_native_certs().certs,
    };
    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs);
    if ignored > 0 {
        warn!("Ignored {ignored} unparsable CA certificates ({added} loaded)");
    }

    Ok(Arc::new(
        builder
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    ))
}

#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
