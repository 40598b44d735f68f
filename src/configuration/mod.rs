use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

mod error;

use crate::auth::method::{HttpSignConfig, ReverseProxyConfig};
use crate::secret::Secret;
use crate::source::{self, Source, SourceConfig, SourceType};
use crate::{cache, signing};
pub use error::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: cache::Config,
    #[serde(default)]
    pub signing: signing::Config,
    pub security: SecurityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub users: HashMap<String, UserEntry>, // hashmap of user name <-> seeded local account
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "ServerConfig::default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "ServerConfig::default_query_timeout_grace_period")]
    pub query_timeout_grace_period: u64,
    /// Upper bound on one pass through the method chain.
    #[serde(default = "ServerConfig::default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Externally visible base URL, used to build OAuth2 callback addresses.
    #[serde(default = "ServerConfig::default_public_url")]
    pub public_url: String,
    #[serde(default = "ServerConfig::default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "ServerConfig::default_remember_cookie")]
    pub remember_cookie: String,
    #[serde(default = "ServerConfig::default_remember_me_days")]
    pub remember_me_days: i64,
    pub tls: Option<ServerTlsConfig>,
}

impl ServerConfig {
    fn default_bind_address() -> IpAddr {
        IpAddr::from(Ipv4Addr::UNSPECIFIED)
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_query_timeout() -> u64 {
        3600
    }

    fn default_query_timeout_grace_period() -> u64 {
        60
    }

    fn default_auth_timeout_ms() -> u64 {
        10_000
    }

    fn default_public_url() -> String {
        "http://localhost:8000".to_string()
    }

    fn default_session_cookie() -> String {
        "i_like_forge".to_string()
    }

    fn default_remember_cookie() -> String {
        "forge_incredible".to_string()
    }

    fn default_remember_me_days() -> i64 {
        7
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ServerConfig::default_bind_address(),
            port: ServerConfig::default_port(),
            query_timeout: ServerConfig::default_query_timeout(),
            query_timeout_grace_period: ServerConfig::default_query_timeout_grace_period(),
            auth_timeout_ms: ServerConfig::default_auth_timeout_ms(),
            public_url: ServerConfig::default_public_url(),
            session_cookie: ServerConfig::default_session_cookie(),
            remember_cookie: ServerConfig::default_remember_cookie(),
            remember_me_days: ServerConfig::default_remember_me_days(),
            tls: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerTlsConfig {
    pub server_certificate_bundle: String,
    pub server_private_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SecurityConfig {
    /// Key material for secrets encrypted at rest in stored source configurations.
    pub secret_key: Secret<String>,
}

/// Name of an authentication method as written in `auth.methods`.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MethodName {
    Session,
    Basic,
    AccessToken,
    #[serde(rename = "oauth2")]
    OAuth2,
    Jwt,
    #[serde(rename = "httpsign")]
    HttpSign,
    ReverseProxy,
    Sspi,
}

/// One link of the chain: a plain method, or a nested array run as a shortcut group.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MethodEntry {
    Single(MethodName),
    Shortcut(Vec<MethodName>),
}

impl MethodEntry {
    pub fn names(&self) -> &[MethodName] {
        match self {
            MethodEntry::Single(name) => std::slice::from_ref(name),
            MethodEntry::Shortcut(names) => names,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_methods")]
    pub methods: Vec<MethodEntry>,
    #[serde(default)]
    pub grants: GrantConfig,
    #[serde(default)]
    pub reverse_proxy: ReverseProxyConfig,
    #[serde(default)]
    pub httpsign: HttpSignConfig,
}

impl AuthConfig {
    fn default_methods() -> Vec<MethodEntry> {
        vec![
            MethodEntry::Shortcut(vec![MethodName::OAuth2, MethodName::Jwt]),
            MethodEntry::Single(MethodName::Basic),
            MethodEntry::Single(MethodName::Session),
        ]
    }

    fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        for entry in &self.methods {
            if entry.names().is_empty() {
                return Err(Error::Invalid(
                    "Empty shortcut group in auth.methods".to_string(),
                ));
            }
            for name in entry.names() {
                if !seen.insert(*name) {
                    return Err(Error::Invalid(format!(
                        "Method {name:?} listed more than once in auth.methods"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            methods: AuthConfig::default_methods(),
            grants: GrantConfig::default(),
            reverse_proxy: ReverseProxyConfig::default(),
            httpsign: HttpSignConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GrantConfig {
    #[serde(default = "GrantConfig::default_access_token_ttl")]
    pub access_token_ttl: i64,
    #[serde(default = "GrantConfig::default_refresh_token_ttl")]
    pub refresh_token_ttl: i64,
}

impl GrantConfig {
    fn default_access_token_ttl() -> i64 {
        3600
    }

    fn default_refresh_token_ttl() -> i64 {
        730 * 3600
    }
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: GrantConfig::default_access_token_ttl(),
            refresh_token_ttl: GrantConfig::default_refresh_token_ttl(),
        }
    }
}

/// An identity source row declared in the configuration file. Every key besides the four
/// common ones belongs to the source-type specific settings.
#[derive(Clone, Debug, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SourceType,
    #[serde(default = "SourceEntry::default_active")]
    pub active: bool,
    #[serde(default)]
    pub sync: bool,
    #[serde(flatten)]
    pub settings: toml::Table,
}

impl SourceEntry {
    fn default_active() -> bool {
        true
    }

    pub fn to_source(&self) -> Result<Source, source::Error> {
        let config = SourceConfig::from_value(self.kind, toml::Value::Table(self.settings.clone()))?;
        let mut source = Source::new(&self.name, self.kind, config);
        source.is_active = self.active;
        source.is_sync_enabled = self.sync;
        Ok(source)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserEntry {
    /// Argon2id PHC string, as printed by the `argon` command.
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice).map_err(|e| {
            println!("Configuration file format error:");
            println!("{e}");
            Error::ConfigurationFileFormat(e.to_string())
        })?;

        if config.security.secret_key.is_empty() {
            return Err(Error::Invalid("security.secret_key must not be empty".to_string()));
        }
        config.auth.validate()?;

        let mut names = HashSet::new();
        for entry in &config.sources {
            if !names.insert(entry.name.as_str()) {
                return Err(Error::Invalid(format!(
                    "Identity source '{}' declared more than once",
                    entry.name
                )));
            }
        }

        if config.server.auth_timeout_ms == 0 {
            return Err(Error::Invalid("server.auth_timeout_ms must be positive".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [security]
        secret_key = "change-me"
    "#;

    #[test]
    fn test_load_minimal_config() {
        let config = Configuration::load_from_str(MINIMAL).unwrap();

        assert_eq!(config.server.bind_address.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.auth_timeout_ms, 10_000);
        assert_eq!(config.server.session_cookie, "i_like_forge");
        assert_eq!(config.server.remember_me_days, 7);
        assert_eq!(config.cache, cache::Config::Memory);
        assert_eq!(config.signing.algorithm, signing::Algorithm::RS256);
        assert_eq!(
            config.auth.methods,
            vec![
                MethodEntry::Shortcut(vec![MethodName::OAuth2, MethodName::Jwt]),
                MethodEntry::Single(MethodName::Basic),
                MethodEntry::Single(MethodName::Session),
            ]
        );
        assert_eq!(config.auth.grants.access_token_ttl, 3600);
        assert!(config.sources.is_empty());
        assert!(config.users.is_empty());
        assert!(config.observability.is_none());
    }

    #[test]
    fn test_missing_security_section_is_rejected() {
        let config = r#"
        [server]
        port = 3000
        "#;

        assert!(matches!(
            Configuration::load_from_str(config),
            Err(Error::ConfigurationFileFormat(_))
        ));
    }

    #[test]
    fn test_empty_secret_key_is_rejected() {
        let config = r#"
        [security]
        secret_key = ""
        "#;

        assert!(matches!(
            Configuration::load_from_str(config),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_chain_order_with_shortcut_groups() {
        let config = r#"
        [security]
        secret_key = "k"

        [auth]
        methods = ["session", ["oauth2", "jwt"], "access_token", "httpsign", "basic"]
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        assert_eq!(
            config.auth.methods,
            vec![
                MethodEntry::Single(MethodName::Session),
                MethodEntry::Shortcut(vec![MethodName::OAuth2, MethodName::Jwt]),
                MethodEntry::Single(MethodName::AccessToken),
                MethodEntry::Single(MethodName::HttpSign),
                MethodEntry::Single(MethodName::Basic),
            ]
        );
    }

    #[test]
    fn test_unknown_method_name_is_rejected() {
        let config = r#"
        [security]
        secret_key = "k"

        [auth]
        methods = ["session", "kerberos"]
        "#;

        assert!(matches!(
            Configuration::load_from_str(config),
            Err(Error::ConfigurationFileFormat(_))
        ));
    }

    #[test]
    fn test_duplicate_method_is_rejected() {
        let config = r#"
        [security]
        secret_key = "k"

        [auth]
        methods = ["basic", ["oauth2", "basic"]]
        "#;

        assert!(matches!(
            Configuration::load_from_str(config),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_reverse_proxy_settings() {
        let config = r#"
        [security]
        secret_key = "k"

        [auth]
        methods = ["reverse_proxy"]

        [auth.reverse_proxy]
        user_header = "X-Forwarded-User"
        auto_register = true
        trusted_proxies = ["10.0.0.0/8", "::1/128"]
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        let proxy = &config.auth.reverse_proxy;
        assert_eq!(proxy.user_header, "X-Forwarded-User");
        assert_eq!(proxy.email_header, "X-WEBAUTH-EMAIL");
        assert!(proxy.auto_register);
        assert_eq!(proxy.trusted_proxies.len(), 2);
        assert!(proxy.trusted_proxies[0].contains("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_sources_are_parsed_into_typed_configs() {
        let config = r#"
        [security]
        secret_key = "k"

        [[sources]]
        name = "corp"
        type = "ldap"
        sync = true
        host = "ldap.example.com"
        port = 636
        security_protocol = "ldaps"
        user_base = "ou=people,dc=example,dc=com"
        filter = "(uid=%s)"
        attribute_username = "uid"

        [[sources]]
        name = "mail"
        type = "smtp"
        active = false
        host = "smtp.example.com"
        port = 587
        auth = "PLAIN"
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        assert_eq!(config.sources.len(), 2);

        let ldap = config.sources[0].to_source().unwrap();
        assert_eq!(ldap.kind, SourceType::Ldap);
        assert!(ldap.is_active);
        assert!(ldap.is_sync_enabled);
        assert!(matches!(ldap.config, SourceConfig::Ldap(_)));

        let smtp = config.sources[1].to_source().unwrap();
        assert_eq!(smtp.kind, SourceType::Smtp);
        assert!(!smtp.is_active);
        assert!(matches!(smtp.config, SourceConfig::Smtp(_)));
    }

    #[test]
    fn test_duplicate_source_name_is_rejected() {
        let config = r#"
        [security]
        secret_key = "k"

        [[sources]]
        name = "corp"
        type = "pam"

        [[sources]]
        name = "corp"
        type = "pam"
        "#;

        assert!(matches!(
            Configuration::load_from_str(config),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_seeded_users() {
        let config = r#"
        [security]
        secret_key = "k"

        [users.admin]
        password = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"
        email = "admin@example.com"
        admin = true
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        let admin = &config.users["admin"];
        assert!(admin.admin);
        assert_eq!(admin.email, "admin@example.com");
    }

    #[test]
    fn test_observability_tracing() {
        let config = r#"
        [security]
        secret_key = "k"

        [observability.tracing]
        endpoint = "http://collector:4317"
        sampling_rate = 0.5
        "#;

        let config = Configuration::load_from_str(config).unwrap();
        let tracing = config.observability.unwrap().tracing.unwrap();
        assert_eq!(tracing.endpoint, "http://collector:4317");
        assert!((tracing.sampling_rate - 0.5).abs() < f64::EPSILON);
    }
}
