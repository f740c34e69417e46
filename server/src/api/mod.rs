use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use wagerbook_types::api::ADMIN_TOKEN_HEADER;

use crate::Server;

mod http;

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

pub struct Api {
    server: Arc<Server>,
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        let config = &self.server.config;

        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();
        let cors = if allowed_origins.contains("*") {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config
        let http_governor = governor_config(
            parse_env_u64("RATE_LIMIT_HTTP_PER_SEC").or(config.http_rate_limit_per_second),
            parse_env_u32("RATE_LIMIT_HTTP_BURST").or(config.http_rate_limit_burst),
            1_000_000_000,
        );
        let login_governor = governor_config(
            parse_env_u64("RATE_LIMIT_ADMIN_LOGIN_PER_MIN")
                .or(config.admin_login_rate_limit_per_minute),
            parse_env_u32("RATE_LIMIT_ADMIN_LOGIN_BURST").or(config.admin_login_rate_limit_burst),
            60_000_000_000,
        );

        // Admin login gets its own limiter so guessing the secret is slow
        let login_route = match login_governor {
            Some(config) => Router::new()
                .route("/admin/login", post(http::admin_login))
                .layer(GovernorLayer { config }),
            None => Router::new().route("/admin/login", post(http::admin_login)),
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/config", get(http::config))
            .route("/auth/sign-up", post(http::sign_up))
            .route("/auth/sign-in", post(http::sign_in))
            .route("/auth/sign-out", post(http::sign_out))
            .route("/player/me", get(http::me))
            .route("/player/bets", post(http::place_bet))
            .route("/admin/logout", post(http::admin_logout))
            .route("/admin/config", put(http::set_max_bet))
            .route("/admin/house", get(http::house))
            .route("/admin/players/:id/adjust", post(http::adjust));

        let router = match http_governor {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.merge(login_route);

        let router = router.layer(cors);
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.server.clone())
    }
}

/// Builds a per-IP limiter allowing `rate` requests per `window_nanos`.
fn governor_config(
    rate: Option<u64>,
    burst: Option<u32>,
    window_nanos: u64,
) -> Option<Arc<IpGovernorConfig>> {
    match (rate, burst) {
        (Some(rate), Some(burst_size)) if rate > 0 && burst_size > 0 => {
            let period = Duration::from_nanos((window_nanos / rate).max(1));
            tracing::info!(
                rate,
                burst_size,
                period_ms = period.as_millis(),
                "rate limit configured"
            );
            let config = GovernorConfigBuilder::default()
                .period(period)
                .burst_size(burst_size)
                .key_extractor(SmartIpKeyExtractor)
                .finish();
            if config.is_none() {
                tracing::warn!("invalid rate-limit config; limiter disabled");
            }
            config.map(Arc::new)
        }
        _ => None,
    }
}

fn parse_allowed_origins(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if response.status() == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(request_id = %request_id, path = %path, "rate limited");
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
