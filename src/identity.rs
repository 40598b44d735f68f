use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::SourceType;
use crate::token::AccessTokenScope;

pub const AUTHED_METHOD: &str = "AuthedMethod";
pub const IS_API_TOKEN: &str = "IsApiToken";
pub const API_TOKEN_SCOPE: &str = "ApiTokenScope";
pub const IS_SKIP_LOCAL_TWO_FA: &str = "IsSkipLocal2FA";

/// Local account as seen by the authentication pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub lower_name: String,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub passwd: String,
    pub login_type: SourceType,
    pub login_source: i64,
    pub login_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_restricted: bool,
    pub prohibit_login: bool,
    pub two_factor_enabled: bool,
}

/// Identifier of the synthetic user representing an application-issued token.
pub const SERVICE_USER_ID: i64 = -2;

impl User {
    pub fn service(name: &str) -> Self {
        Self {
            id: SERVICE_USER_ID,
            name: name.to_string(),
            lower_name: name.to_lowercase(),
            full_name: name.to_string(),
            is_active: true,
            ..Self::default()
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.login_type, SourceType::NoType | SourceType::Plain)
    }

    pub fn can_sign_in(&self) -> bool {
        self.is_active && !self.prohibit_login
    }
}

/// Fields required to create a user. The store assigns the id.
#[derive(Clone, Debug, Default, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct NewUser {
    pub name: String,
    pub full_name: String,
    pub email: String,
    pub passwd: String,
    pub login_type: SourceType,
    pub login_source: i64,
    pub login_name: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub is_restricted: bool,
}

impl NewUser {
    pub fn into_user(self, id: i64) -> User {
        User {
            id,
            lower_name: self.name.to_lowercase(),
            name: self.name,
            full_name: self.full_name,
            email: self.email,
            passwd: self.passwd,
            login_type: self.login_type,
            login_source: self.login_source,
            login_name: self.login_name,
            is_active: self.is_active,
            is_admin: self.is_admin,
            is_restricted: self.is_restricted,
            prohibit_login: false,
            two_factor_enabled: false,
        }
    }
}

/// Columns a pipeline component may write back through `UserStore::update_user_columns`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserColumn {
    FullName,
    Email,
    Passwd,
    IsActive,
    IsAdmin,
    IsRestricted,
    ProhibitLogin,
    TwoFactorEnabled,
}

/// Purpose of a stored SSH key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    #[default]
    User,
    Principal,
}

/// SSH public key registered for a user, either directly or harvested from a directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub fingerprint: String,
    pub content: String,
    pub kind: KeyKind,
    pub login_source_id: i64,
}

/// Link between a local user and an account at a federated provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalLogin {
    pub external_id: String,
    pub user_id: i64,
    pub login_source_id: i64,
    pub provider: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Directive a method asks the HTTP layer to apply to the outgoing response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ResponseHint {
    SetCookie(String),
    Negotiate(String),
}

/// Result of a successful pass through the method chain.
#[derive(Clone, Debug, Serialize)]
pub struct AuthenticatedIdentity {
    pub user: User,
    pub method: &'static str,
    pub is_api_token: bool,
    pub scope: Option<AccessTokenScope>,
    pub skip_local_two_fa: bool,
    #[serde(skip)]
    pub hints: Vec<ResponseHint>,
}

impl fmt::Display for AuthenticatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (id {}) via {}", self.user.name, self.user.id, self.method)
    }
}

/// Per-request key/value bag read by downstream authorization checks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataStore(HashMap<String, Value>);

impl DataStore {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn attach(&mut self, identity: &AuthenticatedIdentity) {
        self.set(AUTHED_METHOD, identity.method);
        self.set(IS_API_TOKEN, identity.is_api_token);
        self.set(IS_SKIP_LOCAL_TWO_FA, identity.skip_local_two_fa);
        if let Some(scope) = &identity.scope {
            self.set(API_TOKEN_SCOPE, scope.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_store_attach() {
        let identity = AuthenticatedIdentity {
            user: User::service("ci"),
            method: "jwt",
            is_api_token: true,
            scope: Some(AccessTokenScope::parse("read:repository").unwrap()),
            skip_local_two_fa: false,
            hints: vec![],
        };

        let mut store = DataStore::default();
        store.attach(&identity);

        assert_eq!(store.get_str(AUTHED_METHOD), Some("jwt"));
        assert!(store.get_bool(IS_API_TOKEN));
        assert!(!store.get_bool(IS_SKIP_LOCAL_TWO_FA));
        assert_eq!(store.get_str(API_TOKEN_SCOPE), Some("read:repository"));
    }

    #[test]
    fn test_password_hash_is_never_serialized() {
        let user = User {
            name: "alice".to_string(),
            passwd: "$argon2id$v=19$...".to_string(),
            ..User::default()
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn test_service_user_has_negative_id() {
        let user = User::service("Actions");
        assert!(user.id < 0);
        assert_eq!(user.lower_name, "actions");
        assert!(user.can_sign_in());
    }
}
