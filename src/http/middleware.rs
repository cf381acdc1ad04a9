//! Axum middleware translating admission decisions into HTTP responses.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::warn;

use crate::admission::{AdmissionController, ClientKey, Decision, DenyReason};

const LIMIT_MINUTE: HeaderName = HeaderName::from_static("x-ratelimit-limit-minute");
const REMAINING_MINUTE: HeaderName = HeaderName::from_static("x-ratelimit-remaining-minute");
const LIMIT_HOUR: HeaderName = HeaderName::from_static("x-ratelimit-limit-hour");
const REMAINING_HOUR: HeaderName = HeaderName::from_static("x-ratelimit-remaining-hour");
const BURST_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-burst-limit");
const BURST_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-burst-window");

/// Authenticated principal attached to the request extensions by an upstream
/// auth middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// Shared state for the admission middleware.
pub struct AdmissionState {
    /// The admission controller consulted per request
    pub controller: AdmissionController,
    /// Diagnostic paths that bypass admission control entirely
    pub exempt_paths: HashSet<String>,
}

impl AdmissionState {
    /// Create middleware state over a controller and the configured exempt
    /// paths.
    pub fn new(
        controller: AdmissionController,
        exempt_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            controller,
            exempt_paths: exempt_paths.into_iter().collect(),
        }
    }
}

/// Intercepts every request ahead of business handlers.
///
/// CORS preflight requests and exempt diagnostic paths bypass the controller
/// and mutate no window state. Everything else is checked: denials
/// short-circuit with a 429 and quota headers, admitted requests are
/// forwarded and their responses annotated with quota headers regardless of
/// downstream status.
pub async fn admission_middleware(
    State(state): State<Arc<AdmissionState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS
        || state.exempt_paths.contains(request.uri().path())
    {
        return next.run(request).await;
    }

    let resource = request.uri().path().to_string();
    let Some(client) = client_key(&request) else {
        warn!(
            resource = %resource,
            "No client identity available, request passes unmetered"
        );
        return next.run(request).await;
    };

    let decision = state.controller.check(&client, &resource, Instant::now());

    if !decision.allowed {
        warn!(
            client = %client,
            resource = %resource,
            reason = ?decision.reason,
            retry_after = decision.retry_after_seconds,
            "Request rejected by admission control"
        );
        return rejection_response(&decision);
    }

    let mut response = next.run(request).await;
    apply_quota_headers(response.headers_mut(), &decision);
    response
}

/// Derive the client key from the request.
///
/// An authenticated principal wins over any address. The address comes from
/// the first `X-Forwarded-For` entry when present, otherwise from the socket
/// peer address.
fn client_key(request: &Request) -> Option<ClientKey> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.as_str());

    let ip = forwarded_ip(request.headers()).or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    });

    ClientKey::from_identity(user, ip)
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[derive(Debug, Serialize)]
struct RateLimitExceededBody {
    error: &'static str,
    message: String,
    retry_after: u64,
}

fn rejection_response(decision: &Decision) -> Response {
    let message = match decision.reason {
        Some(DenyReason::BurstExceeded) => format!(
            "Burst limit exceeded: too many requests in a short interval. Retry after {} seconds.",
            decision.retry_after_seconds
        ),
        Some(DenyReason::MinuteExceeded) => {
            "Per-minute request limit exceeded. Retry after 60 seconds.".to_string()
        }
        Some(DenyReason::HourExceeded) => {
            "Hourly request limit exceeded. Retry after 3600 seconds.".to_string()
        }
        None => "Request rate limit exceeded.".to_string(),
    };

    let body = RateLimitExceededBody {
        error: "RATE_LIMIT_EXCEEDED",
        message,
        retry_after: decision.retry_after_seconds,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_quota_headers(headers, decision);
    headers.insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after_seconds),
    );
    response
}

fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    let policy = &decision.policy;
    headers.insert(LIMIT_MINUTE, HeaderValue::from(policy.requests_per_minute));
    headers.insert(REMAINING_MINUTE, HeaderValue::from(decision.remaining_minute));
    headers.insert(LIMIT_HOUR, HeaderValue::from(policy.requests_per_hour));
    headers.insert(REMAINING_HOUR, HeaderValue::from(decision.remaining_hour));
    headers.insert(BURST_LIMIT, HeaderValue::from(policy.burst_limit));
    headers.insert(BURST_WINDOW, HeaderValue::from(policy.burst_window_seconds));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{PolicyRegistry, RateLimitPolicy, WindowTracker};
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn tight_policy() -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_minute: 5,
            requests_per_hour: 50,
            burst_limit: 2,
            burst_window_seconds: 10,
        }
    }

    fn test_state(policy: RateLimitPolicy) -> (Arc<AdmissionState>, Arc<WindowTracker>) {
        let tracker = Arc::new(WindowTracker::new());
        let controller =
            AdmissionController::new(PolicyRegistry::new(policy), Arc::clone(&tracker));
        let state = Arc::new(AdmissionState::new(
            controller,
            ["/health".to_string()],
        ));
        (state, tracker)
    }

    fn test_app(state: Arc<AdmissionState>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/test", get(|| async { "hello" }))
            .route(
                "/api/broken",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .layer(from_fn_with_state(state, admission_middleware))
    }

    fn request_from(path: &str, ip: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn header_value<'a>(response: &'a Response, name: &HeaderName) -> &'a str {
        response
            .headers()
            .get(name)
            .expect("header missing")
            .to_str()
            .unwrap()
    }

    #[tokio::test]
    async fn test_allowed_response_carries_quota_headers() {
        let (state, _) = test_state(tight_policy());
        let app = test_app(state);

        let response = app
            .oneshot(request_from("/api/test", "10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, &LIMIT_MINUTE), "5");
        assert_eq!(header_value(&response, &REMAINING_MINUTE), "4");
        assert_eq!(header_value(&response, &LIMIT_HOUR), "50");
        assert_eq!(header_value(&response, &REMAINING_HOUR), "49");
        assert_eq!(header_value(&response, &BURST_LIMIT), "2");
        assert_eq!(header_value(&response, &BURST_WINDOW), "10");
    }

    #[tokio::test]
    async fn test_denial_returns_429_with_structured_body() {
        let (state, _) = test_state(tight_policy());
        let app = test_app(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request_from("/api/test", "10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request_from("/api/test", "10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header_value(&response, &REMAINING_MINUTE), "0");
        assert_eq!(header_value(&response, &REMAINING_HOUR), "0");
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "10"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["retry_after"], 10);
        assert!(json["message"].as_str().unwrap().contains("Burst"));
    }

    #[tokio::test]
    async fn test_exempt_path_bypasses_controller_and_state() {
        let (state, tracker) = test_state(tight_policy());
        let app = test_app(state);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(request_from("/health", "10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(&LIMIT_MINUTE).is_none());
        }

        assert_eq!(tracker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_cors_preflight_bypasses_controller() {
        let (state, tracker) = test_state(tight_policy());
        let app = test_app(state);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri("/api/test")
                        .header("x-forwarded-for", "10.0.0.1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        assert_eq!(tracker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_authenticated_user_shares_quota_across_ips() {
        let (state, _) = test_state(RateLimitPolicy {
            burst_limit: 1,
            ..tight_policy()
        });
        let app = test_app(state);

        let authed = |ip: &str| {
            Request::builder()
                .uri("/api/test")
                .header("x-forwarded-for", ip)
                .extension(AuthenticatedUser("alice".to_string()))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(authed("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Rotating the source address does not evade the limit.
        let response = app.oneshot(authed("10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unauthenticated_clients_isolated_by_ip() {
        let (state, _) = test_state(RateLimitPolicy {
            burst_limit: 1,
            ..tight_policy()
        });
        let app = test_app(state);

        let ok = app
            .clone()
            .oneshot(request_from("/api/test", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let other = app
            .clone()
            .oneshot(request_from("/api/test", "10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::OK);

        let denied = app
            .oneshot(request_from("/api/test", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_missing_identity_passes_unmetered() {
        let (state, tracker) = test_state(tight_policy());
        let app = test_app(state);

        let response = app
            .oneshot(Request::builder().uri("/api/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tracker.client_count(), 0);
    }

    #[tokio::test]
    async fn test_downstream_error_still_carries_quota_headers() {
        let (state, _) = test_state(tight_policy());
        let app = test_app(state);

        let response = app
            .oneshot(request_from("/api/broken", "10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(header_value(&response, &REMAINING_MINUTE), "4");
    }

    #[test]
    fn test_forwarded_ip_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );

        assert_eq!(
            forwarded_ip(&headers),
            Some("203.0.113.9".parse::<IpAddr>().unwrap())
        );
    }

    #[test]
    fn test_forwarded_ip_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));

        assert_eq!(forwarded_ip(&headers), None);
    }
}
