use hyper::Method;

#[derive(Debug, PartialEq)]
pub enum Route {
    CurrentUserApi,
    CurrentUser,
    SigningKey,
    Metrics,
    Health,
    MethodNotAllowed,
    Unknown,
}

impl Route {
    pub fn action_name(&self) -> &'static str {
        match self {
            Route::CurrentUserApi => "current-user-api",
            Route::CurrentUser => "current-user",
            Route::SigningKey => "signing-key",
            Route::Metrics => "metrics",
            Route::Health => "health",
            Route::MethodNotAllowed => "method-not-allowed",
            Route::Unknown => "unknown",
        }
    }
}

pub fn parse(method: &Method, path: &str) -> Route {
    let route = match path.trim_end_matches('/') {
        "/api/v1/user" => Route::CurrentUserApi,
        "/user" => Route::CurrentUser,
        "/api/v1/signing-key" => Route::SigningKey,
        "/metrics" => Route::Metrics,
        "/health" | "/healthz" => Route::Health,
        _ => return Route::Unknown,
    };

    if method == Method::GET || method == Method::HEAD {
        route
    } else {
        Route::MethodNotAllowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_routes() {
        assert_eq!(parse(&Method::GET, "/api/v1/user"), Route::CurrentUserApi);
        assert_eq!(parse(&Method::GET, "/user"), Route::CurrentUser);
        assert_eq!(parse(&Method::GET, "/api/v1/signing-key"), Route::SigningKey);
        assert_eq!(parse(&Method::GET, "/metrics"), Route::Metrics);
        assert_eq!(parse(&Method::GET, "/healthz"), Route::Health);
    }

    #[test]
    fn test_parse_trailing_slash() {
        assert_eq!(parse(&Method::GET, "/api/v1/user/"), Route::CurrentUserApi);
    }

    #[test]
    fn test_parse_unknown_route() {
        assert_eq!(parse(&Method::GET, "/api/v1/repos"), Route::Unknown);
        assert_eq!(parse(&Method::GET, "/"), Route::Unknown);
    }

    #[test]
    fn test_parse_unknown_method() {
        assert_eq!(parse(&Method::POST, "/user"), Route::MethodNotAllowed);
        assert_eq!(parse(&Method::HEAD, "/health"), Route::Health);
    }
}
