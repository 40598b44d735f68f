use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{LdapConnAsync, LdapConnSettings, SearchEntry};
use tracing::{debug, warn};

use crate::source::ldap::{Config, SecurityProtocol};
use crate::source::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl Entry {
    pub fn first(&self, attribute: &str) -> &str {
        self.attrs
            .get(attribute)
            .and_then(|values| values.first())
            .map_or("", String::as_str)
    }

    pub fn values(&self, attribute: &str) -> &[String] {
        self.attrs.get(attribute).map_or(&[], Vec::as_slice)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Base,
    Subtree,
}

/// An open directory connection. Dropping it without `close` still tears the socket down.
#[async_trait]
pub trait Directory: Send {
    /// `Ok(false)` when the directory refuses the credentials.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool, Error>;

    /// A missing base object yields no entries rather than an error.
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<Entry>, Error>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &Config) -> Result<Box<dyn Directory>, Error>;
}

pub struct Ldap3Connector;

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(&self, config: &Config) -> Result<Box<dyn Directory>, Error> {
        let timeout = match config.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        let settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(config.security_protocol == SecurityProtocol::StartTls)
            .set_no_tls_verify(config.skip_verify);

        let url = config.url();
        debug!("Connecting to {url}");
        let (connection, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| Error::Unavailable(format!("LDAP connect to {url} failed: {e}")))?;
        ldap3::drive!(connection);

        Ok(Box::new(Ldap3Directory {
            ldap,
            page_size: config.search_page_size,
        }))
    }
}

struct Ldap3Directory {
    ldap: ldap3::Ldap,
    page_size: i32,
}

fn unavailable(error: ldap3::LdapError) -> Error {
    Error::Unavailable(format!("LDAP error: {error}"))
}

#[async_trait]
impl Directory for Ldap3Directory {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<bool, Error> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(unavailable)?;

        match result.rc {
            RC_SUCCESS => Ok(true),
            RC_INVALID_CREDENTIALS => {
                debug!("Bind refused for {dn}");
                Ok(false)
            }
            rc => Err(Error::Unavailable(format!(
                "LDAP bind failed with code {rc}: {}",
                result.text
            ))),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<Entry>, Error> {
        let scope = match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::Subtree => ldap3::Scope::Subtree,
        };

        let mut adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
        if self.page_size > 0 {
            adapters.push(Box::new(PagedResults::new(self.page_size)));
        }

        let mut stream = self
            .ldap
            .streaming_search_with(adapters, base, scope, filter, attributes.to_vec())
            .await
            .map_err(unavailable)?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await.map_err(unavailable)? {
            let entry = SearchEntry::construct(entry);
            entries.push(Entry {
                dn: entry.dn,
                attrs: entry.attrs,
            });
        }

        let result = stream.finish().await;
        match result.rc {
            RC_SUCCESS => Ok(entries),
            RC_NO_SUCH_OBJECT => Ok(Vec::new()),
            rc => Err(Error::Unavailable(format!(
                "LDAP search failed with code {rc}: {}",
                result.text
            ))),
        }
    }

    async fn close(&mut self) {
        if let Err(error) = self.ldap.unbind().await {
            warn!("LDAP unbind failed: {error}");
        }
    }
}
