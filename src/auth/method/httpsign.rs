use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use ssh_key::certificate::CertType;
use ssh_key::public::KeyData;
use ssh_key::{Certificate, Fingerprint};
use tracing::{debug, warn};

use crate::auth::credential::SignatureParams;
use crate::auth::method::allowed;
use crate::auth::{path, AuthRequest, Error, HeaderExt, Method, Verified};
use crate::store::{self, Stores};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpSignConfig {
    /// `SHA256:` fingerprints of the certificate authorities allowed to sign user certificates.
    pub trusted_ca_fingerprints: Vec<String>,
    pub certificate_header: String,
    pub max_clock_skew_secs: i64,
}

impl Default for HttpSignConfig {
    fn default() -> Self {
        Self {
            trusted_ca_fingerprints: Vec::new(),
            certificate_header: "x-ssh-certificate".to_string(),
            max_clock_skew_secs: 300,
        }
    }
}

/// HTTP message signatures made with an SSH key, optionally backed by an SSH user certificate.
pub struct HttpSign {
    stores: Stores,
    config: HttpSignConfig,
    trusted_cas: Vec<Fingerprint>,
    invalid_cas: Vec<String>,
}

impl HttpSign {
    pub fn new(stores: Stores, config: HttpSignConfig) -> Self {
        let mut trusted_cas = Vec::new();
        let mut invalid_cas = Vec::new();
        for fingerprint in &config.trusted_ca_fingerprints {
            match fingerprint.parse::<Fingerprint>() {
                Ok(fingerprint) => trusted_cas.push(fingerprint),
                Err(_) => invalid_cas.push(fingerprint.clone()),
            }
        }
        Self {
            stores,
            config,
            trusted_cas,
            invalid_cas,
        }
    }

    fn signature_header(request: &AuthRequest<'_>) -> Option<String> {
        request.parts.get_header("signature").or_else(|| {
            request
                .parts
                .get_header(hyper::header::AUTHORIZATION)
                .filter(|value| {
                    value
                        .get(..10)
                        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("signature "))
                })
        })
    }

    async fn certificate_key(&self, raw: &str) -> Result<(KeyData, i64), Error> {
        if self.trusted_cas.is_empty() {
            return Err(Error::Invalid(
                "no certificate authority is trusted".to_string(),
            ));
        }
        let certificate = Certificate::from_openssh(raw.trim())
            .map_err(|e| Error::Malformed(format!("SSH certificate: {e}")))?;
        if certificate.cert_type() != CertType::User {
            return Err(Error::Invalid("not a user certificate".to_string()));
        }
        certificate
            .validate(self.trusted_cas.iter())
            .map_err(|e| Error::Invalid(format!("certificate not trusted: {e}")))?;

        for principal in certificate.valid_principals() {
            match self.stores.keys.find_principal_key(principal).await {
                Ok(key) => {
                    debug!("Certificate principal '{principal}' belongs to user {}", key.owner_id);
                    return Ok((certificate.public_key().clone(), key.owner_id));
                }
                Err(store::Error::NotFound) => {}
                Err(error) => return Err(error.into()),
            }
        }
        Err(Error::Invalid(
            "no certificate principal is registered".to_string(),
        ))
    }

    async fn fingerprint_key(&self, key_id: &str) -> Result<(KeyData, i64), Error> {
        let key = self.stores.keys.find_key_by_fingerprint(key_id).await?;
        let public = ssh_key::PublicKey::from_openssh(&key.content)
            .map_err(|e| Error::Internal(format!("stored key {} is unreadable: {e}", key.id)))?;
        Ok((public.key_data().clone(), key.owner_id))
    }

    fn check_times(&self, params: &SignatureParams) -> Result<(), Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Internal(e.to_string()))?
            .as_secs();
        let now = i64::try_from(now).map_err(|e| Error::Internal(e.to_string()))?;

        if let Some(created) = params.created {
            if now.abs_diff(created) > self.config.max_clock_skew_secs.unsigned_abs() {
                return Err(Error::Invalid(format!(
                    "signature created at {created} is outside the allowed clock skew"
                )));
            }
        } else if params.headers.iter().any(|h| h == "(created)") {
            return Err(Error::Malformed("(created) is signed but missing".to_string()));
        }

        if params.expires.is_some_and(|expires| expires < now) {
            return Err(Error::Expired);
        }
        Ok(())
    }
}

fn signing_string(request: &AuthRequest<'_>, params: &SignatureParams) -> Result<String, Error> {
    let mut lines = Vec::with_capacity(params.headers.len());
    for name in &params.headers {
        let line = match name.as_str() {
            "(request-target)" => {
                let target = request
                    .parts
                    .uri
                    .path_and_query()
                    .map_or("/", |target| target.as_str());
                format!(
                    "(request-target): {} {target}",
                    request.parts.method.as_str().to_lowercase()
                )
            }
            "(created)" => format!("(created): {}", params.created.unwrap_or_default()),
            "(expires)" => format!("(expires): {}", params.expires.unwrap_or_default()),
            header => {
                let values: Vec<&str> = request
                    .parts
                    .headers
                    .get_all(header)
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .map(str::trim)
                    .collect();
                if values.is_empty() {
                    return Err(Error::Malformed(format!("signed header '{header}' is missing")));
                }
                format!("{header}: {}", values.join(", "))
            }
        };
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn verify_signature(
    key: &KeyData,
    algorithm: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    let invalid = |e: String| Error::Invalid(format!("signature mismatch: {e}"));
    match key {
        KeyData::Ed25519(key) => {
            let key = ed25519_dalek::VerifyingKey::from_bytes(&key.0)
                .map_err(|e| invalid(e.to_string()))?;
            let signature = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|e| invalid(e.to_string()))?;
            key.verify_strict(message, &signature)
                .map_err(|e| invalid(e.to_string()))
        }
        KeyData::Rsa(key) => {
            let key = rsa::RsaPublicKey::try_from(key).map_err(|e| invalid(e.to_string()))?;
            let result = if algorithm.eq_ignore_ascii_case("rsa-sha256") {
                key.verify(
                    rsa::Pkcs1v15Sign::new::<Sha256>(),
                    &Sha256::digest(message),
                    signature,
                )
            } else {
                key.verify(
                    rsa::Pkcs1v15Sign::new::<Sha1>(),
                    &Sha1::digest(message),
                    signature,
                )
            };
            result.map_err(|e| invalid(e.to_string()))
        }
        other => Err(Error::Invalid(format!(
            "unsupported key algorithm {}",
            other.algorithm()
        ))),
    }
}

#[async_trait]
impl Method for HttpSign {
    fn name(&self) -> &'static str {
        "httpsign"
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        path::is_api_path(request.path()) && Self::signature_header(request).is_some()
    }

    async fn init(&self) -> Result<(), Error> {
        if self.invalid_cas.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "invalid trusted CA fingerprints: {}",
                self.invalid_cas.join(", ")
            )))
        }
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some(raw) = Self::signature_header(request) else {
            return Ok(None);
        };
        let params = SignatureParams::parse(&raw)
            .ok_or_else(|| Error::Malformed("signature parameters".to_string()))?;

        let (key, owner_id) = match request.parts.get_header(self.config.certificate_header.as_str())
        {
            Some(certificate) => self.certificate_key(&certificate).await?,
            None => self.fingerprint_key(&params.key_id).await?,
        };

        self.check_times(&params)?;
        let message = signing_string(request, &params)?;
        if let Err(error) = verify_signature(&key, &params.algorithm, message.as_bytes(), &params.signature)
        {
            warn!("HTTP signature with key '{}' did not verify", params.key_id);
            return Err(error);
        }

        let user = allowed(self.stores.users.get_user_by_id(owner_id).await?)?;
        Ok(Some(Verified {
            user,
            is_api_token: true,
            ..Verified::default()
        }))
    }
}
