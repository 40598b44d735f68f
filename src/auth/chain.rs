use std::sync::Arc;

use tracing::field::Empty;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::auth::{AuthRequest, Error, Method, Trust, Verified};
use crate::identity::{AuthenticatedIdentity, ResponseHint};
use crate::metrics_provider::AUTH_ATTEMPTS;

pub enum Link {
    Method(Arc<dyn Method>),
    /// Members are tried in order and their errors are swallowed.
    Shortcut(Vec<Arc<dyn Method>>),
}

#[derive(Debug)]
pub enum Outcome {
    Authenticated(AuthenticatedIdentity),
    /// No method produced an identity. Hints carry pending negotiation challenges.
    Anonymous(Vec<ResponseHint>),
    /// A method found a credential for itself and refused it.
    Rejected { method: &'static str, error: Error },
}

#[derive(Default)]
pub struct Group {
    links: Vec<Link>,
}

enum Step {
    Matched(Verified),
    Skipped,
    Stop(Error),
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Arc<dyn Method>) {
        self.links.push(Link::Method(method));
    }

    pub fn register_shortcut(&mut self, methods: Vec<Arc<dyn Method>>) {
        if !methods.is_empty() {
            self.links.push(Link::Shortcut(methods));
        }
    }

    /// Every method in chain order, shortcut members flattened.
    pub fn methods(&self) -> Vec<Arc<dyn Method>> {
        self.links
            .iter()
            .flat_map(|link| match link {
                Link::Method(method) => std::slice::from_ref(method),
                Link::Shortcut(methods) => methods.as_slice(),
            })
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.methods().iter().map(|method| method.name()).collect()
    }

    /// Initialize every method in chain order. Methods that fail are logged and dropped.
    pub async fn init(&mut self) {
        let mut links = Vec::with_capacity(self.links.len());
        for link in self.links.drain(..) {
            match link {
                Link::Method(method) => {
                    if init_method(method.as_ref()).await {
                        links.push(Link::Method(method));
                    }
                }
                Link::Shortcut(methods) => {
                    let mut members = Vec::with_capacity(methods.len());
                    for method in methods {
                        if init_method(method.as_ref()).await {
                            members.push(method);
                        }
                    }
                    if !members.is_empty() {
                        links.push(Link::Shortcut(members));
                    }
                }
            }
        }
        self.links = links;
    }

    pub async fn free(&self) {
        for method in self.methods() {
            method.free().await;
        }
    }

    #[instrument(
        skip(self, request),
        fields(path = %request.path(), remote = %request.remote(), auth_method = Empty)
    )]
    pub async fn verify(&self, request: &AuthRequest<'_>) -> Outcome {
        let mut hints = Vec::new();

        for link in &self.links {
            let (members, quiet) = match link {
                Link::Method(method) => (std::slice::from_ref(method), false),
                Link::Shortcut(methods) => (methods.as_slice(), true),
            };

            for method in members {
                if !method.is_applicable(request) {
                    continue;
                }
                match attempt(method.as_ref(), request, quiet, &mut hints).await {
                    Step::Matched(verified) => {
                        Span::current().record("auth_method", method.name());
                        let mut identity = AuthenticatedIdentity {
                            user: verified.user,
                            method: method.name(),
                            is_api_token: verified.is_api_token,
                            scope: verified.scope,
                            skip_local_two_fa: verified.skip_local_two_fa,
                            hints: verified.hints,
                        };
                        identity.hints.append(&mut hints);
                        debug!("Authenticated {identity}");
                        return Outcome::Authenticated(identity);
                    }
                    Step::Skipped => {}
                    Step::Stop(error) => {
                        return Outcome::Rejected {
                            method: method.name(),
                            error,
                        }
                    }
                }
            }
        }

        Span::current().record("auth_method", "anonymous");
        Outcome::Anonymous(hints)
    }
}

async fn init_method(method: &dyn Method) -> bool {
    if method.trust() == Trust::Perimeter {
        info!(
            "Authentication method '{}' trusts an upstream proxy",
            method.name()
        );
    }
    match method.init().await {
        Ok(()) => true,
        Err(err) => {
            error!(
                "Authentication method '{}' failed to initialize and is disabled: {err}",
                method.name()
            );
            false
        }
    }
}

async fn attempt(
    method: &dyn Method,
    request: &AuthRequest<'_>,
    quiet: bool,
    hints: &mut Vec<ResponseHint>,
) -> Step {
    let name = method.name();
    match method.verify(request).await {
        Ok(Some(verified)) => {
            AUTH_ATTEMPTS.with_label_values(&[name, "success"]).inc();
            Step::Matched(verified)
        }
        Ok(None) => Step::Skipped,
        Err(error) => {
            AUTH_ATTEMPTS
                .with_label_values(&[name, error.metric_result()])
                .inc();
            match error {
                Error::Challenge(token) => {
                    hints.push(ResponseHint::Negotiate(token));
                    Step::Skipped
                }
                Error::Unavailable(err) => {
                    warn!("Authentication method '{name}' unavailable: {err}");
                    Step::Skipped
                }
                Error::Timeout => Step::Stop(Error::Timeout),
                error if quiet => {
                    debug!("Authentication method '{name}' did not match: {error}");
                    Step::Skipped
                }
                error @ (Error::Invalid(_) | Error::InvalidHash) => {
                    warn!(
                        "Authentication method '{name}' refused a credential from {}: {error}",
                        request.remote()
                    );
                    Step::Stop(error)
                }
                error => {
                    debug!("Authentication method '{name}' failed: {error}");
                    Step::Stop(error)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use hyper::Request;

    use super::*;
    use crate::identity::User;

    struct Fake {
        name: &'static str,
        applicable: bool,
        result: Result<Option<&'static str>, Error>,
        init: Result<(), Error>,
        calls: AtomicUsize,
    }

    impl Fake {
        fn new(name: &'static str, result: Result<Option<&'static str>, Error>) -> Arc<Self> {
            Arc::new(Self {
                name,
                applicable: true,
                result,
                init: Ok(()),
                calls: AtomicUsize::new(0),
            })
        }

        fn not_applicable(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                applicable: false,
                result: Ok(Some(name)),
                init: Ok(()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing_init(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                applicable: true,
                result: Ok(Some(name)),
                init: Err(Error::Unavailable("no backend".to_string())),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Method for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_applicable(&self, _request: &AuthRequest<'_>) -> bool {
            self.applicable
        }

        async fn init(&self) -> Result<(), Error> {
            self.init.clone()
        }

        async fn verify(&self, _request: &AuthRequest<'_>) -> Result<Option<Verified>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(|user| {
                user.map(|name| Verified::user(User {
                    name: name.to_string(),
                    ..User::default()
                }))
            })
        }
    }

    async fn run(group: &Group) -> Outcome {
        let (parts, ()) = Request::builder()
            .uri("/api/v1/user")
            .body(())
            .unwrap()
            .into_parts();
        group.verify(&AuthRequest::new(&parts, None)).await
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Fake::not_applicable("a");
        let b = Fake::new("b", Ok(Some("bob")));
        let c = Fake::new("c", Ok(Some("carol")));

        let mut group = Group::new();
        group.register(a.clone());
        group.register(b.clone());
        group.register(c.clone());

        let Outcome::Authenticated(identity) = run(&group).await else {
            panic!("expected an identity");
        };
        assert_eq!(identity.user.name, "bob");
        assert_eq!(identity.method, "b");
        assert_eq!(a.calls(), 0);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_match_is_anonymous() {
        let mut group = Group::new();
        group.register(Fake::new("a", Ok(None)));
        group.register(Fake::not_applicable("b"));

        assert!(matches!(run(&group).await, Outcome::Anonymous(hints) if hints.is_empty()));
    }

    #[tokio::test]
    async fn test_shortcut_swallows_member_errors() {
        let first = Fake::new("oauth2", Err(Error::Invalid("bad signature".to_string())));
        let second = Fake::new("jwt", Ok(Some("ci")));

        let mut group = Group::new();
        group.register_shortcut(vec![first.clone(), second.clone()]);

        let Outcome::Authenticated(identity) = run(&group).await else {
            panic!("expected an identity");
        };
        assert_eq!(identity.method, "jwt");
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test]
    async fn test_plain_link_error_rejects() {
        let basic = Fake::new("basic", Err(Error::NotFound));
        let later = Fake::new("later", Ok(Some("eve")));

        let mut group = Group::new();
        group.register(basic);
        group.register(later.clone());

        match run(&group).await {
            Outcome::Rejected { method, error } => {
                assert_eq!(method, "basic");
                assert_eq!(error, Error::NotFound);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(later.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_backend_moves_on() {
        let mut group = Group::new();
        group.register(Fake::new("ldap", Err(Error::Unavailable("dial".to_string()))));
        group.register(Fake::new("session", Ok(Some("alice"))));

        let Outcome::Authenticated(identity) = run(&group).await else {
            panic!("expected an identity");
        };
        assert_eq!(identity.method, "session");
    }

    #[tokio::test]
    async fn test_challenge_is_carried_to_anonymous_outcome() {
        let mut group = Group::new();
        group.register(Fake::new("sspi", Err(Error::Challenge("oQcwBaADCgEA".to_string()))));

        let Outcome::Anonymous(hints) = run(&group).await else {
            panic!("expected anonymous");
        };
        assert_eq!(hints, vec![ResponseHint::Negotiate("oQcwBaADCgEA".to_string())]);
    }

    #[tokio::test]
    async fn test_failed_init_disables_method() {
        let broken = Fake::failing_init("sspi");
        let mut group = Group::new();
        group.register(broken.clone());
        group.register_shortcut(vec![Fake::failing_init("x")]);
        group.register(Fake::new("session", Ok(Some("alice"))));

        group.init().await;

        assert_eq!(group.names(), vec!["session"]);
        let Outcome::Authenticated(identity) = run(&group).await else {
            panic!("expected an identity");
        };
        assert_eq!(identity.method, "session");
        assert_eq!(broken.calls(), 0);
    }
}
