//! Raw credential extraction. Nothing here validates a credential.
use std::collections::HashMap;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use hyper::header::{AsHeaderName, AUTHORIZATION, COOKIE};
use hyper::http::request::Parts;

/// Values that stand in for "no password" when a token travels as the Basic user name.
const TOKEN_AS_USERNAME_SENTINELS: &[&str] = &["x-oauth-basic", "x-access-token"];

#[derive(Clone, Debug, PartialEq)]
pub enum Credential {
    Basic { user: String, pass: String },
    Bearer(String),
    SessionId(String),
    HttpSignature {
        certificate: Option<String>,
        signature: SignatureParams,
    },
    Spnego(Vec<u8>),
}

impl Credential {
    /// Whether a Basic credential carries a token in its user name instead of a password.
    pub fn is_token_as_username(pass: &str) -> bool {
        pass.is_empty()
            || TOKEN_AS_USERNAME_SENTINELS
                .iter()
                .any(|sentinel| pass.eq_ignore_ascii_case(sentinel))
    }
}

/// Parse `Basic <b64>`, `Bearer <token>`, `token <token>` or `Negotiate <b64>`.
///
/// Anything else, including a header with more than two fields, is no match.
pub fn parse_authorization_header(value: &str) -> Option<Credential> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    let [scheme, payload] = fields.as_slice() else {
        return None;
    };

    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = BASE64_STANDARD.decode(payload).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some(Credential::Basic {
            user: user.to_string(),
            pass: pass.to_string(),
        })
    } else if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token") {
        Some(Credential::Bearer((*payload).to_string()))
    } else if scheme.eq_ignore_ascii_case("negotiate") {
        BASE64_STANDARD.decode(payload).ok().map(Credential::Spnego)
    } else {
        None
    }
}

/// Parameters of an HTTP `Signature`, as in draft-cavage-http-signatures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignatureParams {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

impl SignatureParams {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value
            .strip_prefix("Signature ")
            .or_else(|| value.strip_prefix("signature "))
            .unwrap_or(value);

        let mut params = HashMap::new();
        for item in split_params(value) {
            let (name, raw) = item.split_once('=')?;
            let raw = raw.trim();
            let unquoted = raw
                .strip_prefix('"')
                .and_then(|raw| raw.strip_suffix('"'))
                .unwrap_or(raw);
            params.insert(name.trim().to_ascii_lowercase(), unquoted.to_string());
        }

        let key_id = params.remove("keyid").filter(|id| !id.is_empty())?;
        let signature = BASE64_STANDARD.decode(params.remove("signature")?).ok()?;
        let headers = params
            .remove("headers")
            .map(|headers| {
                headers
                    .split_whitespace()
                    .map(str::to_ascii_lowercase)
                    .collect()
            })
            .unwrap_or_else(|| vec!["(created)".to_string()]);

        Some(Self {
            key_id,
            algorithm: params.remove("algorithm").unwrap_or_default(),
            headers,
            signature,
            created: params.get("created").and_then(|v| v.parse().ok()),
            expires: params.get("expires").and_then(|v| v.parse().ok()),
        })
    }
}

/// Split on commas that are not inside a quoted value.
fn split_params(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (index, c) in value.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                items.push(value[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    let last = value[start..].trim();
    if !last.is_empty() {
        items.push(last);
    }
    items
}

pub trait HeaderExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
    fn authorization(&self) -> Option<Credential>;
    fn bearer_token(&self) -> Option<String>;
    fn basic_auth(&self) -> Option<(String, String)>;
    fn cookie(&self, name: &str) -> Option<String>;
    fn query_param(&self, name: &str) -> Option<String>;
}

impl HeaderExt for Parts {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.headers
            .get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    fn authorization(&self) -> Option<Credential> {
        parse_authorization_header(&self.get_header(AUTHORIZATION)?)
    }

    fn bearer_token(&self) -> Option<String> {
        match self.authorization()? {
            Credential::Bearer(token) => Some(token),
            _ => None,
        }
    }

    fn basic_auth(&self) -> Option<(String, String)> {
        match self.authorization()? {
            Credential::Basic { user, pass } => Some((user, pass)),
            _ => None,
        }
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }
}
