use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::{to_bytes, Body};
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

static LOG_COUNTER: AtomicU64 = AtomicU64::new(1);

const BODY_READ_LIMIT_BYTES: usize = 1_048_576;
const SHORT_BODY_MAX_CHARS: usize = 160;

/// Logs each request with a running number, the handler it routes to, and a one-line body preview.
pub async fn log_webhook_request(request: Request<Body>, next: Next) -> Response {
    let method = request.method().as_str().to_string();
    let route = request.extensions().get::<MatchedPath>().map_or_else(
        || request.uri().path().to_string(),
        |matched_path| matched_path.as_str().to_string(),
    );

    let (parts, body) = request.into_parts();
    let (body_bytes, short_body) = match to_bytes(body, BODY_READ_LIMIT_BYTES).await {
        Ok(bytes) => {
            let shortened = shorten_request_body(&String::from_utf8_lossy(&bytes));
            (bytes, shortened)
        }
        Err(_) => (
            axum::body::Bytes::new(),
            "<request-body-unavailable>".to_string(),
        ),
    };

    let handler = handler_name(method.as_str(), route.as_str());
    let log_number = LOG_COUNTER.fetch_add(1, Ordering::Relaxed);
    tracing::info!(log_number, %method, handler, %route, body = %short_body, "request");

    let request = Request::from_parts(parts, Body::from(body_bytes));
    next.run(request).await
}

fn shorten_request_body(raw_body: &str) -> String {
    if raw_body.is_empty() {
        return "-".to_string();
    }

    let single_line = raw_body.split_whitespace().collect::<Vec<_>>().join(" ");

    if single_line.chars().count() <= SHORT_BODY_MAX_CHARS {
        return single_line;
    }

    let mut shortened = single_line
        .chars()
        .take(SHORT_BODY_MAX_CHARS)
        .collect::<String>();
    shortened.push_str("...");
    shortened
}

fn handler_name(method: &str, route: &str) -> &'static str {
    match (method, route) {
        ("POST", "/api/webhooks/github/pullrequest") => "webhook.pull_request_webhook",
        ("GET", "/healthz") => "webhook.healthz",
        _ => "unknown.unknown_handler",
    }
}
