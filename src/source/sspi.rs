use serde::{Deserialize, Serialize};

/// How principals negotiated through SPNEGO map to local accounts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub auto_create_users: bool,
    pub auto_activate_users: bool,
    /// `DOMAIN\user` and `user@REALM` become `user`.
    pub strip_domain_names: bool,
    /// Replaces `\`, `/` and `@` left in the name after stripping.
    pub separator_replacement: String,
    pub default_language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_create_users: true,
            auto_activate_users: true,
            strip_domain_names: true,
            separator_replacement: "_".to_string(),
            default_language: "en-US".to_string(),
        }
    }
}

impl Config {
    /// Local user name for a negotiated principal.
    pub fn user_name(&self, principal: &str) -> String {
        let name = if self.strip_domain_names {
            strip_domain(principal)
        } else {
            principal
        };
        replace_separators(name, &self.separator_replacement)
    }
}

fn strip_domain(principal: &str) -> &str {
    if let Some((_, user)) = principal.split_once('\\') {
        return user;
    }
    if let Some((user, _)) = principal.split_once('@') {
        return user;
    }
    principal
}

fn replace_separators(name: &str, replacement: &str) -> String {
    name.replace(['\\', '/', '@'], replacement)
}
