use argh::FromArgs;
use chrono::TimeDelta;

use crate::auth::method::issue_service_token;
use crate::command::Error;
use crate::configuration::Configuration;
use crate::signing::{JwkSet, SigningKey};
use crate::token::AccessTokenScope;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "keygen",
    description = "Load or generate the signing key and print its public JWK"
)]
pub struct Options {
    /// issue a service token for this subject instead of printing the JWK
    #[argh(option)]
    service_token: Option<String>,

    /// scope of the issued service token, defaults to `all`
    #[argh(option, default = "String::from(\"all\")")]
    scope: String,

    /// lifetime of the issued service token in hours, defaults to 24
    #[argh(option, default = "24")]
    hours: i64,
}

pub struct Command {
    options: Options,
}

impl Command {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn run(&self, config: &Configuration) -> Result<(), Error> {
        let key = SigningKey::load_or_generate(&config.signing)?;
        println!("{}", self.render(&key)?);
        Ok(())
    }

    fn render(&self, key: &SigningKey) -> Result<String, Error> {
        if let Some(subject) = &self.options.service_token {
            let scope = AccessTokenScope::parse(&self.options.scope).map_err(|e| {
                Error::Initialization(format!("Invalid scope '{}': {e}", self.options.scope))
            })?;
            let token =
                issue_service_token(key, subject, &scope, TimeDelta::hours(self.options.hours))?;
            return Ok(token);
        }

        let Some(jwk) = key.jwk() else {
            return Err(Error::Initialization(format!(
                "{} keys are symmetric and have no public JWK",
                key.algorithm().as_str()
            )));
        };
        let set = JwkSet {
            keys: vec![jwk.clone()],
        };
        serde_json::to_string_pretty(&set)
            .map_err(|e| Error::Initialization(format!("Unable to encode JWK: {e}")))
    }
}
