use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::signing::Error;

/// Public half of a signing key, in JSON Web Key form.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        n: String,
        e: String,
    },
    #[serde(rename = "EC")]
    Ec {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        #[serde(default)]
        crv: String,
        x: String,
        y: String,
    },
    #[serde(rename = "OKP")]
    Okp {
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        key_use: Option<String>,
        kid: Option<String>,
        alg: Option<String>,
        crv: String,
        x: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    pub fn kid(&self) -> Option<&str> {
        match self {
            Jwk::Rsa { kid, .. } | Jwk::Ec { kid, .. } | Jwk::Okp { kid, .. } => kid.as_deref(),
        }
    }

    /// RFC 7638 thumbprint: SHA-256 over the required members in lexicographic order.
    pub fn thumbprint(&self) -> String {
        let canonical = match self {
            Jwk::Rsa { n, e, .. } => json!({ "e": e, "kty": "RSA", "n": n }),
            Jwk::Ec { crv, x, y, .. } => json!({ "crv": crv, "kty": "EC", "x": x, "y": y }),
            Jwk::Okp { crv, x, .. } => json!({ "crv": crv, "kty": "OKP", "x": x }),
        };
        // serde_json orders object keys alphabetically without the preserve_order feature.
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    pub fn with_identity(self, new_kid: String, new_alg: &str) -> Self {
        let key_use = Some("sig".to_string());
        let alg = Some(new_alg.to_string());
        match self {
            Jwk::Rsa { n, e, .. } => Jwk::Rsa {
                key_use,
                kid: Some(new_kid),
                alg,
                n,
                e,
            },
            Jwk::Ec { crv, x, y, .. } => Jwk::Ec {
                key_use,
                kid: Some(new_kid),
                alg,
                crv,
                x,
                y,
            },
            Jwk::Okp { crv, x, .. } => Jwk::Okp {
                key_use,
                kid: Some(new_kid),
                alg,
                crv,
                x,
            },
        }
    }

    pub fn to_decoding_key(&self) -> Result<DecodingKey, Error> {
        match self {
            Jwk::Rsa { n, e, alg, kid, .. } => {
                debug!("Creating RSA DecodingKey from JWK with alg={alg:?}, kid={kid:?}");
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| Error::InvalidKey(format!("Failed to create RSA key: {e}")))
            }
            Jwk::Ec { x, y, alg, kid, .. } => {
                debug!("Creating EC DecodingKey from JWK with alg={alg:?}, kid={kid:?}");
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| Error::InvalidKey(format!("Failed to create EC key: {e}")))
            }
            Jwk::Okp { x, alg, kid, .. } => {
                debug!("Creating EdDSA DecodingKey from JWK with alg={alg:?}, kid={kid:?}");
                DecodingKey::from_ed_components(x)
                    .map_err(|e| Error::InvalidKey(format!("Failed to create EdDSA key: {e}")))
            }
        }
    }
}
