use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::header::{HeaderValue, SET_COOKIE, WWW_AUTHENTICATE};
use hyper::http::request::Parts;
use hyper::HeaderMap;
use tracing::{info, warn};

use crate::auth::{AuthRequest, Error, Group, Outcome};
use crate::identity::{AuthenticatedIdentity, DataStore, ResponseHint};

/// How a refused credential surfaces to the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Browser routes: a refused credential leaves the request anonymous.
    Web,
    /// API routes: a refused credential is a 401.
    Api,
}

#[derive(Debug)]
pub struct Resolution {
    pub identity: Option<AuthenticatedIdentity>,
    pub data: DataStore,
    pub hints: Vec<ResponseHint>,
}

/// The request must be answered with a 401.
#[derive(Debug, PartialEq)]
pub struct Rejection {
    pub reason: String,
    /// `WWW-Authenticate` value, when the client can continue a negotiation.
    pub challenge: Option<String>,
}

/// Runs the method chain in front of a group of routes.
#[derive(Clone)]
pub struct Authenticator {
    group: Arc<Group>,
    timeout: Duration,
    mode: Mode,
}

fn negotiate_header(token: &str) -> String {
    if token.is_empty() {
        "Negotiate".to_string()
    } else {
        format!("Negotiate {token}")
    }
}

impl Authenticator {
    /// Wrapper for browser routes.
    pub fn auth(group: Arc<Group>, timeout: Duration) -> Self {
        Self {
            group,
            timeout,
            mode: Mode::Web,
        }
    }

    /// Wrapper for API routes.
    pub fn api_auth(group: Arc<Group>, timeout: Duration) -> Self {
        Self {
            group,
            timeout,
            mode: Mode::Api,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn authenticate(
        &self,
        parts: &Parts,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Resolution, Rejection> {
        let request = AuthRequest::new(parts, remote_addr);
        let cancel = request.cancel.clone();

        let outcome = match tokio::time::timeout(self.timeout, self.group.verify(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!(
                    "Authentication of {} {} timed out after {:?}",
                    parts.method,
                    parts.uri.path(),
                    self.timeout
                );
                Outcome::Rejected {
                    method: "chain",
                    error: Error::Timeout,
                }
            }
        };

        match outcome {
            Outcome::Authenticated(identity) => {
                let mut data = DataStore::default();
                data.attach(&identity);
                let hints = identity.hints.clone();
                Ok(Resolution {
                    identity: Some(identity),
                    data,
                    hints,
                })
            }
            Outcome::Anonymous(hints) => {
                let challenge = hints.iter().find_map(|hint| match hint {
                    ResponseHint::Negotiate(token) => Some(negotiate_header(token)),
                    ResponseHint::SetCookie(_) => None,
                });
                if let Some(challenge) = challenge {
                    return Err(Rejection {
                        reason: "negotiation required".to_string(),
                        challenge: Some(challenge),
                    });
                }
                Ok(Resolution {
                    identity: None,
                    data: DataStore::default(),
                    hints,
                })
            }
            Outcome::Rejected { method, error } => match self.mode {
                Mode::Web => {
                    info!("Treating request as anonymous, '{method}' refused it: {error}");
                    Ok(Resolution {
                        identity: None,
                        data: DataStore::default(),
                        hints: Vec::new(),
                    })
                }
                Mode::Api => Err(Rejection {
                    reason: error.to_string(),
                    challenge: None,
                }),
            },
        }
    }
}

/// Copy the directives methods left for the response into its headers.
pub fn apply_hints(headers: &mut HeaderMap, hints: &[ResponseHint]) {
    for hint in hints {
        let (name, value) = match hint {
            ResponseHint::SetCookie(cookie) => (SET_COOKIE, cookie.clone()),
            ResponseHint::Negotiate(token) => (WWW_AUTHENTICATE, negotiate_header(token)),
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.append(name, value);
            }
            Err(error) => warn!("Dropping invalid {name} header: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hyper::Request;

    use super::*;
    use crate::auth::{Method, Verified};
    use crate::identity::{User, AUTHED_METHOD};

    struct Fixed {
        result: Result<Option<Verified>, Error>,
        delay: Duration,
    }

    #[async_trait]
    impl Method for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn is_applicable(&self, _request: &AuthRequest<'_>) -> bool {
            true
        }

        async fn verify(&self, _request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn group(result: Result<Option<Verified>, Error>, delay: Duration) -> Arc<Group> {
        let mut group = Group::new();
        group.register(Arc::new(Fixed { result, delay }));
        Arc::new(group)
    }

    async fn run(authenticator: &Authenticator) -> Result<Resolution, Rejection> {
        let (parts, ()) = Request::builder()
            .uri("/api/v1/user")
            .body(())
            .unwrap()
            .into_parts();
        authenticator.authenticate(&parts, None).await
    }

    #[tokio::test]
    async fn test_identity_is_attached_to_data_store() {
        let mut verified = Verified::user(User::service("ci"));
        verified
            .hints
            .push(ResponseHint::SetCookie("a=b".to_string()));
        let group = group(Ok(Some(verified)), Duration::ZERO);

        let resolution = run(&Authenticator::api_auth(group, Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(resolution.identity.unwrap().user.name, "ci");
        assert_eq!(resolution.data.get_str(AUTHED_METHOD), Some("fixed"));
        assert_eq!(resolution.hints.len(), 1);
    }

    #[tokio::test]
    async fn test_refused_credential_per_mode() {
        let group = group(Err(Error::Invalid("bad".to_string())), Duration::ZERO);

        let web = run(&Authenticator::auth(group.clone(), Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(web.identity.is_none());

        let api = run(&Authenticator::api_auth(group, Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(api.challenge, None);
        assert!(api.reason.contains("bad"));
    }

    #[tokio::test]
    async fn test_negotiation_challenge() {
        let group = group(Err(Error::Challenge("dG9rZW4=".to_string())), Duration::ZERO);

        let rejection = run(&Authenticator::auth(group, Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(rejection.challenge.as_deref(), Some("Negotiate dG9rZW4="));
    }

    #[tokio::test]
    async fn test_timeout() {
        let group = group(Ok(None), Duration::from_secs(5));

        let web = run(&Authenticator::auth(group.clone(), Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(web.identity.is_none());

        let api = run(&Authenticator::api_auth(group, Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(api.reason, Error::Timeout.to_string());
    }

    #[test]
    fn test_apply_hints() {
        let mut headers = HeaderMap::new();
        apply_hints(
            &mut headers,
            &[
                ResponseHint::SetCookie("a=1; Path=/".to_string()),
                ResponseHint::SetCookie("b=2; Path=/".to_string()),
                ResponseHint::Negotiate(String::new()),
                ResponseHint::SetCookie("bad\nvalue".to_string()),
            ],
        );
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(headers.get(WWW_AUTHENTICATE).unwrap(), "Negotiate");
    }
}
