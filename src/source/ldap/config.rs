use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProtocol {
    #[default]
    Unencrypted,
    Ldaps,
    StartTls,
}

/// Settings of one LDAP (search-then-bind) or DLDAP (direct bind) source.
///
/// The bind password is never written out in clear: it lives in `bind_password_encrypt` once the
/// source has been stored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub security_protocol: SecurityProtocol,
    pub skip_verify: bool,
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: Secret<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bind_password_encrypt: String,
    pub user_base: String,
    /// DN template for direct bind, `%s` is replaced by the login.
    pub user_dn: String,
    pub filter: String,
    pub admin_filter: String,
    pub restricted_filter: String,
    pub attribute_username: String,
    pub attribute_name: String,
    pub attribute_surname: String,
    pub attribute_mail: String,
    pub attribute_ssh_public_key: String,
    /// Read user attributes as the bind DN before binding as the user.
    pub attributes_in_bind: bool,
    pub search_page_size: i32,
    pub allow_deactivate_all: bool,
    pub group_dn: String,
    pub group_filter: String,
    pub group_member_uid: String,
    pub user_uid: String,
    pub timeout_secs: u64,
    /// Users of this directory are not asked for a local second factor.
    pub skip_local_two_fa: bool,
}

impl Config {
    pub fn url(&self) -> String {
        let (scheme, default_port) = match self.security_protocol {
            SecurityProtocol::Ldaps => ("ldaps", 636),
            SecurityProtocol::Unencrypted | SecurityProtocol::StartTls => ("ldap", 389),
        };
        let port = if self.port == 0 {
            default_port
        } else {
            self.port
        };
        format!("{scheme}://{}:{port}", self.host)
    }

    pub fn has_group_filter(&self) -> bool {
        !self.group_dn.trim().is_empty()
    }

    pub fn harvests_ssh_keys(&self) -> bool {
        !self.attribute_ssh_public_key.trim().is_empty()
    }

    pub(crate) fn attributes(&self) -> Vec<String> {
        let mut attributes: Vec<String> = [
            &self.attribute_username,
            &self.attribute_name,
            &self.attribute_surname,
            &self.attribute_mail,
            &self.attribute_ssh_public_key,
            &self.user_uid,
        ]
        .into_iter()
        .filter(|attribute| !attribute.is_empty())
        .cloned()
        .collect();
        attributes.sort();
        attributes.dedup();
        attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_uses_protocol_default_port() {
        let mut config = Config {
            host: "ldap.example.org".to_string(),
            ..Config::default()
        };
        assert_eq!(config.url(), "ldap://ldap.example.org:389");

        config.security_protocol = SecurityProtocol::Ldaps;
        assert_eq!(config.url(), "ldaps://ldap.example.org:636");

        config.port = 10636;
        assert_eq!(config.url(), "ldaps://ldap.example.org:10636");
    }

    #[test]
    fn test_bind_password_is_not_serialized() {
        let config = Config {
            bind_password: Secret::from("hunter2"),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("bind_password_encrypt"));
    }
}
