//! SMTP source: a login is valid when the mail server accepts it for `AUTH`.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls_pki_types::ServerName;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument, warn};

use crate::identity::{NewUser, User};
use crate::source::{db, Error, Source, SourceType};
use crate::store::Stores;
use crate::tls;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REPLY_LINES: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mechanism {
    #[default]
    Plain,
    Login,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub auth: Mechanism,
    pub host: String,
    pub port: u16,
    /// Comma separated list of e-mail domains accepted by this source.
    pub allowed_domains: String,
    /// Implicit TLS from the first byte.
    pub force_smtps: bool,
    /// Upgrade with STARTTLS; the server must offer it.
    pub use_starttls: bool,
    pub skip_verify: bool,
    pub helo_hostname: String,
    pub disable_helo: bool,
    pub timeout_secs: u64,
    pub skip_local_two_fa: bool,
}

impl Config {
    fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => DEFAULT_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn is_domain_allowed(&self, login: &str) -> bool {
        if self.allowed_domains.trim().is_empty() {
            return true;
        }
        let Some((_, domain)) = login.rsplit_once('@') else {
            return false;
        };
        self.allowed_domains
            .split(',')
            .map(str::trim)
            .any(|allowed| allowed.eq_ignore_ascii_case(domain))
    }
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

#[derive(Debug)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        self.lines.join(" ")
    }
}

struct Client {
    stream: BufReader<Box<dyn Stream>>,
    encrypted: bool,
}

impl Client {
    fn new(stream: Box<dyn Stream>, encrypted: bool) -> Self {
        Self {
            stream: BufReader::new(stream),
            encrypted,
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .stream
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Unavailable(format!("SMTP read failed: {e}")))?;
            if read == 0 {
                return Err(Error::Unavailable("SMTP server closed the connection".into()));
            }

            let line = line.trim_end();
            let code = line
                .get(..3)
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| Error::Unavailable(format!("Malformed SMTP reply: {line}")))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());

            if !more {
                return Ok(Reply { code, lines });
            }
            if lines.len() > MAX_REPLY_LINES {
                return Err(Error::Unavailable("SMTP reply too long".into()));
            }
        }
    }

    async fn command(&mut self, line: &str) -> Result<Reply, Error> {
        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| Error::Unavailable(format!("SMTP write failed: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::Unavailable(format!("SMTP write failed: {e}")))?;
        self.read_reply().await
    }

    /// `EHLO`, falling back to `HELO`. Returns the advertised extension keywords.
    async fn hello(&mut self, hostname: &str) -> Result<Vec<String>, Error> {
        let reply = self.command(&format!("EHLO {hostname}")).await?;
        if reply.code == 250 {
            return Ok(reply
                .lines
                .iter()
                .skip(1)
                .filter_map(|line| line.split_whitespace().next())
                .map(str::to_ascii_uppercase)
                .collect());
        }

        let reply = self.command(&format!("HELO {hostname}")).await?;
        if reply.code != 250 {
            return Err(Error::Unavailable(format!(
                "SMTP server refused HELO: {} {}",
                reply.code,
                reply.text()
            )));
        }
        Ok(Vec::new())
    }

    async fn start_tls(self, host: &str, skip_verify: bool) -> Result<Self, Error> {
        let stream = upgrade(self.stream.into_inner(), host, skip_verify).await?;
        Ok(Self::new(stream, true))
    }
}

async fn upgrade(
    stream: Box<dyn Stream>,
    host: &str,
    skip_verify: bool,
) -> Result<Box<dyn Stream>, Error> {
    let config = tls::client_config(skip_verify, None)
        .map_err(|e| Error::Configuration(format!("TLS setup failed: {e}")))?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Configuration(format!("Invalid SMTP host name: {e}")))?;

    let stream = TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::Unavailable(format!("SMTP TLS handshake failed: {e}")))?;
    Ok(Box::new(stream))
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

fn is_rejection(reply: &Reply) -> bool {
    matches!(reply.code, 534 | 535) || reply.text().contains("Username and Password not accepted")
}

async fn expect(client: &mut Client, line: &str, code: u16) -> Result<Reply, Error> {
    let reply = client.command(line).await?;
    if reply.code == code {
        Ok(reply)
    } else {
        Err(Error::Unavailable(format!(
            "Unexpected SMTP reply {}: {}",
            reply.code,
            reply.text()
        )))
    }
}

async fn authenticate_plain(client: &mut Client, login: &str, password: &str) -> Result<Reply, Error> {
    let response = STANDARD.encode(format!("\0{login}\0{password}"));
    client.command(&format!("AUTH PLAIN {response}")).await
}

async fn authenticate_login(client: &mut Client, login: &str, password: &str) -> Result<Reply, Error> {
    let reply = client.command("AUTH LOGIN").await?;
    if reply.code != 334 {
        return Ok(reply);
    }
    let reply = client.command(&STANDARD.encode(login)).await?;
    if reply.code != 334 {
        return Ok(reply);
    }
    client.command(&STANDARD.encode(password)).await
}

async fn dialogue(
    mut client: Client,
    config: &Config,
    login: &str,
    password: &str,
) -> Result<(), Error> {
    let greeting = client.read_reply().await?;
    if greeting.code != 220 {
        return Err(Error::Unavailable(format!(
            "SMTP server not ready: {} {}",
            greeting.code,
            greeting.text()
        )));
    }

    let hostname = if config.disable_helo || config.helo_hostname.is_empty() {
        "localhost"
    } else {
        config.helo_hostname.as_str()
    };
    let mut extensions = client.hello(hostname).await?;

    if config.use_starttls && !client.encrypted {
        if !extensions.iter().any(|extension| extension == "STARTTLS") {
            return Err(Error::Unsupported("SMTP server does not offer STARTTLS".into()));
        }
        expect(&mut client, "STARTTLS", 220).await?;
        client = client.start_tls(&config.host, config.skip_verify).await?;
        extensions = client.hello(hostname).await?;
    }

    if !extensions.iter().any(|extension| extension == "AUTH") {
        return Err(Error::Unsupported("SMTP server does not offer AUTH".into()));
    }

    let reply = match config.auth {
        Mechanism::Plain => {
            if !client.encrypted && !is_loopback(&config.host) {
                return Err(Error::Unsupported(
                    "PLAIN authentication over an unencrypted connection".into(),
                ));
            }
            authenticate_plain(&mut client, login, password).await?
        }
        Mechanism::Login => authenticate_login(&mut client, login, password).await?,
    };

    let result = match reply.code {
        235 => Ok(()),
        _ if is_rejection(&reply) => Err(Error::UserNotFound(login.to_string())),
        code => Err(Error::Unavailable(format!(
            "SMTP authentication failed with {code}: {}",
            reply.text()
        ))),
    };

    if let Err(error) = client.command("QUIT").await {
        debug!("SMTP QUIT failed: {error}");
    }
    result
}

/// Check `login`/`password` with the mail server. The connection is dropped on every path.
#[instrument(skip(config, password), fields(host = %config.host))]
pub async fn authenticate(config: &Config, login: &str, password: &str) -> Result<(), Error> {
    if !config.is_domain_allowed(login) {
        debug!("Domain of '{login}' is not allowed");
        return Err(Error::UserNotFound(login.to_string()));
    }

    let address = format!("{}:{}", config.host, config.port);
    let session = async {
        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|e| Error::Unavailable(format!("Unable to dial {address}: {e}")))?;
        let client = if config.force_smtps {
            Client::new(upgrade(Box::new(tcp), &config.host, config.skip_verify).await?, true)
        } else {
            Client::new(Box::new(tcp), false)
        };
        dialogue(client, config, login, password).await
    };

    timeout(config.timeout(), session)
        .await
        .map_err(|_| Error::Unavailable(format!("SMTP dialogue with {address} timed out")))?
}

pub async fn login(
    stores: &Stores,
    source: &Source,
    config: &Config,
    user: Option<User>,
    login: &str,
    password: &str,
) -> Result<User, Error> {
    authenticate(config, login, password).await?;

    if let Some(user) = user {
        return Ok(user);
    }

    let username = login.split_once('@').map_or(login, |(name, _)| name);
    let user = stores
        .users
        .create_user(NewUser {
            name: username.to_lowercase(),
            email: login.to_string(),
            passwd: db::hash_password(password)?,
            login_type: SourceType::Smtp,
            login_source: source.id,
            login_name: login.to_string(),
            is_active: true,
            ..NewUser::default()
        })
        .await
        .inspect_err(|error| warn!("Unable to create user for '{login}': {error}"))?;
    info!("Created user '{}' from SMTP source '{}'", user.name, source.name);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Scripted server: for every expected client line prefix, the reply to send.
    async fn serve(script: Vec<(&'static str, &'static str)>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut read = BufReader::new(read);
            let mut received = Vec::new();

            write.write_all(b"220 mail.example.org ESMTP\r\n").await.unwrap();
            for (expected, reply) in script {
                let mut line = String::new();
                if read.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                assert!(line.starts_with(expected), "expected {expected}, got {line}");
                received.push(line);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
            received
        });

        (port, handle)
    }

    fn config(port: u16, auth: Mechanism) -> Config {
        Config {
            auth,
            host: "127.0.0.1".to_string(),
            port,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_plain_authentication_success() {
        let (port, server) = serve(vec![
            ("EHLO", "250-mail.example.org\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n"),
            ("AUTH PLAIN", "235 2.7.0 Authentication successful\r\n"),
            ("QUIT", "221 Bye\r\n"),
        ])
        .await;

        authenticate(&config(port, Mechanism::Plain), "alice@example.org", "secret")
            .await
            .unwrap();

        let received = server.await.unwrap();
        let expected = STANDARD.encode("\0alice@example.org\0secret");
        assert_eq!(received[1], format!("AUTH PLAIN {expected}"));
    }

    #[tokio::test]
    async fn test_login_mechanism_rejection_maps_to_not_found() {
        let (port, server) = serve(vec![
            ("EHLO", "250-mail.example.org\r\n250 AUTH LOGIN\r\n"),
            ("AUTH LOGIN", "334 VXNlcm5hbWU6\r\n"),
            ("YWxpY2U=", "334 UGFzc3dvcmQ6\r\n"),
            ("", "535 5.7.8 Authentication credentials invalid\r\n"),
            ("QUIT", "221 Bye\r\n"),
        ])
        .await;

        let result = authenticate(&config(port, Mechanism::Login), "alice", "wrong").await;
        assert_eq!(result, Err(Error::UserNotFound("alice".to_string())));
        assert_eq!(server.await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_auth_extension() {
        let (port, _server) = serve(vec![("EHLO", "250 mail.example.org\r\n")]).await;

        let result = authenticate(&config(port, Mechanism::Plain), "alice", "secret").await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_starttls_required_but_not_offered() {
        let (port, _server) =
            serve(vec![("EHLO", "250-mail.example.org\r\n250 AUTH PLAIN\r\n")]).await;

        let config = Config {
            use_starttls: true,
            ..config(port, Mechanism::Plain)
        };
        let result = authenticate(&config, "alice", "secret").await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let (port, _server) = serve(vec![
            ("EHLO", "502 Command not implemented\r\n"),
            ("HELO", "250 mail.example.org\r\n"),
        ])
        .await;

        let result = authenticate(&config(port, Mechanism::Plain), "alice", "secret").await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_disallowed_domain_never_dials() {
        let config = Config {
            allowed_domains: "example.org, example.com".to_string(),
            ..config(1, Mechanism::Plain)
        };

        let result = authenticate(&config, "alice@evil.test", "secret").await;
        assert_eq!(result, Err(Error::UserNotFound("alice@evil.test".to_string())));
        let result = authenticate(&config, "alice", "secret").await;
        assert_eq!(result, Err(Error::UserNotFound("alice".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = authenticate(&config(port, Mechanism::Plain), "alice", "secret").await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[test]
    fn test_allowed_domains_are_case_insensitive() {
        let config = Config {
            allowed_domains: "Example.org".to_string(),
            ..Config::default()
        };
        assert!(config.is_domain_allowed("bob@example.ORG"));
        assert!(!config.is_domain_allowed("bob@example.org.evil"));
    }
}
