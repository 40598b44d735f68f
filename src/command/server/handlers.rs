use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::auth::{apply_hints, Resolution};
use crate::command::server::router::{self, Route};
use crate::command::server::{Error, ServerContext};
use crate::identity::API_TOKEN_SCOPE;
use crate::metrics_provider::METRICS_PROVIDER;

const DEFAULT_CHALLENGE: &str = r#"Basic realm="forge-auth", charset="UTF-8""#;

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ServerContext>,
    timeouts: [Duration; 2],
    remote_address: SocketAddr,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request, remote_address)),
    );
    pin!(conn);

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("Connection from {remote_address} closed"),
                    Err(error) => debug!("Error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

#[instrument(skip(context, request))]
async fn handle_request(
    context: Arc<ServerContext>,
    request: Request<Incoming>,
    remote_address: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start_time = Instant::now();
    let (parts, _) = request.into_parts();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match route(&context, &parts, Some(remote_address)).await {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id.as_ref()),
    };

    METRICS_PROVIDER.metric_http_request_total.inc();

    let elapsed = start_time.elapsed();
    let status = response.status();
    let log = match trace_id {
        Some(trace_id) => format!(
            "{trace_id} {elapsed:?} - {status} {} {}",
            parts.method,
            parts.uri.path()
        ),
        None => format!("{elapsed:?} - {status} {} {}", parts.method, parts.uri.path()),
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

pub(crate) async fn route(
    context: &ServerContext,
    parts: &Parts,
    remote_address: Option<SocketAddr>,
) -> Result<Response<Full<Bytes>>, Error> {
    let route = router::parse(&parts.method, parts.uri.path());
    debug!("Dispatching {}", route.action_name());

    match route {
        Route::CurrentUserApi => {
            let resolution = context.authenticate_api(parts, remote_address).await?;
            handle_current_user(&resolution)
        }
        Route::CurrentUser => {
            let resolution = context.authenticate(parts, remote_address).await?;
            handle_current_user(&resolution)
        }
        Route::SigningKey => json_response(StatusCode::OK, &serde_json::to_value(context.jwk_set())?),
        Route::Metrics => handle_metrics(),
        Route::Health => json_response(StatusCode::OK, &json!({"status": "ok"})),
        Route::MethodNotAllowed => Err(Error::MethodNotAllowed(parts.method.to_string())),
        Route::Unknown => Err(Error::NotFound(parts.uri.path().to_string())),
    }
}

fn handle_current_user(resolution: &Resolution) -> Result<Response<Full<Bytes>>, Error> {
    let body = match &resolution.identity {
        Some(identity) => json!({
            "anonymous": false,
            "user": identity.user,
            "method": identity.method,
            "is_api_token": identity.is_api_token,
            "scope": resolution.data.get_str(API_TOKEN_SCOPE),
            "skip_local_two_fa": identity.skip_local_two_fa,
        }),
        None => json!({"anonymous": true}),
    };

    let mut response = json_response(StatusCode::OK, &body)?;
    apply_hints(response.headers_mut(), &resolution.hints);
    Ok(response)
}

fn handle_metrics() -> Result<Response<Full<Bytes>>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(metrics)))?)
}

fn json_response(
    status: StatusCode,
    body: &serde_json::Value,
) -> Result<Response<Full<Bytes>>, Error> {
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))?)
}

pub fn error_to_response(error: &Error, request_id: Option<&String>) -> Response<Full<Bytes>> {
    if error.status_code().is_server_error() {
        error!("{error}");
    }

    let mut response = Response::new(Full::new(Bytes::from(
        error.as_json(request_id).to_string(),
    )));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Error::Unauthorized { challenge, .. } = error {
        let challenge = challenge
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
            .unwrap_or(HeaderValue::from_static(DEFAULT_CHALLENGE));
        response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
    }
    response
}
