use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::auth::method::allowed;
use crate::auth::{AuthRequest, Error, HeaderExt, Method, Trust, Verified};
use crate::identity::NewUser;
use crate::store::{self, UserStore};

/// An address block such as `10.0.0.0/8` or `fd00::/8`. A bare address is a single host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            IpAddr::V4(_) => addr,
        };
        match (self.network, addr) {
            (IpAddr::V4(network), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(network) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(network) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = match value.split_once('/') {
            Some((address, prefix)) => (address, Some(prefix)),
            None => (value, None),
        };
        let network: IpAddr = address
            .trim()
            .parse()
            .map_err(|e| format!("invalid address in '{value}': {e}"))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|prefix| *prefix <= max)
                .ok_or_else(|| format!("invalid prefix length in '{value}'"))?,
            None => max,
        };
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ReverseProxyConfig {
    pub user_header: String,
    pub email_header: String,
    pub full_name_header: String,
    pub auto_register: bool,
    /// Domain of generated e-mail addresses when the proxy sends none.
    pub email_domain: String,
    pub trusted_proxies: Vec<Cidr>,
}

impl Default for ReverseProxyConfig {
    fn default() -> Self {
        Self {
            user_header: "X-WEBAUTH-USER".to_string(),
            email_header: "X-WEBAUTH-EMAIL".to_string(),
            full_name_header: "X-WEBAUTH-FULLNAME".to_string(),
            auto_register: false,
            email_domain: "localhost".to_string(),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Trusts the user name an authenticating proxy put in a request header.
pub struct ReverseProxy {
    users: Arc<dyn UserStore>,
    config: ReverseProxyConfig,
}

impl ReverseProxy {
    pub fn new(users: Arc<dyn UserStore>, config: ReverseProxyConfig) -> Self {
        Self { users, config }
    }

    fn from_trusted_proxy(&self, request: &AuthRequest<'_>) -> bool {
        request.remote_addr.is_some_and(|addr| {
            self.config
                .trusted_proxies
                .iter()
                .any(|cidr| cidr.contains(addr.ip()))
        })
    }

    fn header(&self, request: &AuthRequest<'_>, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        request
            .parts
            .get_header(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
impl Method for ReverseProxy {
    fn name(&self) -> &'static str {
        "reverse_proxy"
    }

    fn trust(&self) -> Trust {
        Trust::Perimeter
    }

    fn is_applicable(&self, request: &AuthRequest<'_>) -> bool {
        self.header(request, &self.config.user_header).is_some()
            && self.from_trusted_proxy(request)
    }

    async fn init(&self) -> Result<(), Error> {
        if self.config.trusted_proxies.is_empty() {
            return Err(Error::Internal(
                "reverse proxy authentication requires trusted_proxies".to_string(),
            ));
        }
        Ok(())
    }

    async fn verify(&self, request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
        let Some(name) = self.header(request, &self.config.user_header) else {
            return Ok(None);
        };

        match self.users.get_user_by_name(&name).await {
            Ok(user) => return allowed(user).map(|user| Some(Verified::user(user))),
            Err(store::Error::NotFound) if self.config.auto_register => {}
            Err(store::Error::NotFound) => {
                debug!("Proxy asserted unknown user '{name}'");
                return Err(Error::NotFound);
            }
            Err(error) => return Err(error.into()),
        }

        let email = self
            .header(request, &self.config.email_header)
            .unwrap_or_else(|| format!("{name}@{}", self.config.email_domain));
        let full_name = self
            .header(request, &self.config.full_name_header)
            .unwrap_or_default();

        let user = match self
            .users
            .create_user(NewUser {
                name: name.clone(),
                full_name,
                email,
                is_active: true,
                ..NewUser::default()
            })
            .await
        {
            Ok(user) => user,
            Err(store::Error::Duplicate(_)) => self.users.get_user_by_name(&name).await?,
            Err(error) => return Err(error.into()),
        };
        info!("Registered '{}' asserted by the reverse proxy", user.name);
        Ok(Some(Verified::user(user)))
    }
}
