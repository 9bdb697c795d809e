//! T513 API Gateway
//!
//! The single HTTP entry point for the community site's donation page.
//! Handles:
//! - Authentication and role checks
//! - Rate limiting
//! - Request routing to the donation engine
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::FromRef,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use t513_common::{
    auth::JwtManager,
    clock::SystemClock,
    config::{AppConfig, ObservabilityConfig},
    db::{schema, DbPool, Repository},
    donation::{AvatarResolver, DonationEngine},
    errors::AppError,
    metrics,
};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub engine: Arc<DonationEngine>,
    pub jwt: Arc<JwtManager>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);

    init_tracing(&config.observability);
    info!("Starting T513 API Gateway v{}", t513_common::VERSION);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                metrics::LATENCY_BUCKETS,
            )?
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.bootstrap_schema {
        schema::bootstrap(db.write()).await?;
    }

    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .context("auth.jwt_secret must be set")?;
    let jwt = Arc::new(JwtManager::new(secret, config.auth.jwt_expiration_secs));

    let avatars = AvatarResolver::new(&config.donation.avatar_base_url)?;
    let engine = Arc::new(DonationEngine::new(
        Repository::new(db.clone()),
        Arc::new(SystemClock),
        avatars,
    ));

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        engine,
        jwt,
    };

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host / server.port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router, AppError> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let donation_routes = Router::new()
        .route("/", post(handlers::donations::start_session))
        .route("/code", post(handlers::donations::generate_code))
        .route(
            "/queue",
            post(handlers::donations::join_queue).delete(handlers::donations::leave_queue),
        )
        .route("/queue/pause", post(handlers::donations::pause_queue))
        .route("/queue/stop", post(handlers::donations::stop_queue))
        .route("/redeem", post(handlers::donations::redeem_code))
        .route("/end", post(handlers::donations::end_session))
        .route("/status", get(handlers::donations::status))
        .route("/status/admin", get(handlers::donations::admin_status))
        .route("/me", get(handlers::donations::my_entry))
        .route_layer(from_fn(middleware::metrics::track_metrics));

    let mut api_routes = Router::new().nest("/donations", donation_routes);

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst,
        )?;
        api_routes = api_routes.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    let timeout = state.config.request_timeout();
    let max_concurrent = state.config.server.max_concurrent_requests;

    // Compose the app
    Ok(Router::new()
        // Health endpoints (no auth, not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use sea_orm::{ConnectOptions, ConnectionTrait, Database};
    use serde_json::Value;
    use t513_common::auth::Role;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Harness {
        app: Router,
        db: DbPool,
        engine: Arc<DonationEngine>,
        jwt: Arc<JwtManager>,
    }

    async fn harness() -> Harness {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1);
        let conn = Database::connect(options).await.unwrap();
        schema::bootstrap(&conn).await.unwrap();
        let db = DbPool::from_connection(conn);

        let jwt = Arc::new(JwtManager::new("test_secret", 3600));
        let engine = Arc::new(DonationEngine::new(
            Repository::new(db.clone()),
            Arc::new(SystemClock),
            AvatarResolver::new("https://www.habbo.es/habbo-imaging/avatarimage").unwrap(),
        ));

        let state = AppState {
            config: Arc::new(AppConfig::default()),
            db: db.clone(),
            engine: engine.clone(),
            jwt: jwt.clone(),
        };

        Harness {
            app: create_router(state).unwrap(),
            db,
            engine,
            jwt,
        }
    }

    impl Harness {
        fn token(&self, user_id: Uuid, nickname: &str, role: Role) -> String {
            self.jwt.generate_token(user_id, nickname, role).unwrap()
        }

        async fn send(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, body) = h.send(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = h.send(Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"]["up"], true);
        assert_eq!(body["schema"]["up"], true);
    }

    #[tokio::test]
    async fn test_not_ready_without_single_active_index() {
        let h = harness().await;
        h.db.write()
            .execute_unprepared("DROP INDEX donations_single_active")
            .await
            .unwrap();

        let (status, body) = h.send(Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["database"]["up"], true);
        assert_eq!(body["schema"]["up"], false);
    }

    #[tokio::test]
    async fn test_oversized_code_fails_validation() {
        let h = harness().await;
        let admin = h.token(Uuid::new_v4(), "Frank", Role::Admin);
        let bravo = h.engine.repository().create_user("Bravo").await.unwrap();
        let member = h.token(bravo.id, "Bravo", Role::User);

        h.send(Method::POST, "/v1/donations", Some(&admin), None).await;
        h.send(Method::POST, "/v1/donations/code", Some(&admin), None).await;

        for code in ["A".repeat(500_000), String::new()] {
            let (status, body) = h
                .send(
                    Method::POST,
                    "/v1/donations/redeem",
                    Some(&member),
                    Some(serde_json::json!({ "code": code })),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
            assert_eq!(body["error"]["field"], "code");
        }

        let (_, private) = h
            .send(Method::GET, "/v1/donations/status/admin", Some(&admin), None)
            .await;
        assert!(private["currentCode"].is_string());
    }

    #[tokio::test]
    async fn test_status_offline_without_auth() {
        let h = harness().await;
        let (status, body) = h.send(Method::GET, "/v1/donations/status", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isLive"], false);
    }

    #[tokio::test]
    async fn test_start_requires_token() {
        let h = harness().await;
        let (status, _) = h.send(Method::POST, "/v1/donations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = h
            .send(Method::POST, "/v1/donations", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_member_cannot_start_session() {
        let h = harness().await;
        let token = h.token(Uuid::new_v4(), "Bravo", Role::User);

        let (status, body) = h
            .send(Method::POST, "/v1/donations", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_session_flow_over_http() {
        let h = harness().await;
        let admin = h.token(Uuid::new_v4(), "Frank", Role::Admin);
        let bravo = h.engine.repository().create_user("Bravo").await.unwrap();
        let member = h.token(bravo.id, "Bravo", Role::User);

        let (status, body) = h
            .send(Method::POST, "/v1/donations", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["sessionId"].is_string());

        let (status, _) = h
            .send(Method::POST, "/v1/donations", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = h
            .send(Method::POST, "/v1/donations/queue", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = h
            .send(Method::POST, "/v1/donations/code", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap().to_string();

        let (_, public) = h.send(Method::GET, "/v1/donations/status", None, None).await;
        assert_eq!(public["isLive"], true);
        assert_eq!(public["queue"][0]["nickname"], "Bravo");
        assert!(public.get("currentCode").is_none());

        let (status, private) = h
            .send(Method::GET, "/v1/donations/status/admin", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(private["currentCode"], code.as_str());

        let (status, me) = h
            .send(Method::GET, "/v1/donations/me", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["position"], 1);

        let (status, _) = h
            .send(
                Method::POST,
                "/v1/donations/redeem",
                Some(&member),
                Some(serde_json::json!({ "code": code.to_lowercase() })),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = h
            .send(
                Method::POST,
                "/v1/donations/redeem",
                Some(&member),
                Some(serde_json::json!({ "code": code })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "NO_ACTIVE_CODE");

        let (status, body) = h
            .send(Method::POST, "/v1/donations/queue/stop", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["standings"][0]["nickname"], "Bravo");

        let (status, _) = h
            .send(Method::POST, "/v1/donations/end", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let stored = h
            .engine
            .repository()
            .find_user_by_id(bravo.id)
            .await
            .unwrap()
            .unwrap();
        // one for the redemption, one for being queued at stop
        assert_eq!(stored.donation_participations, 2);

        let (_, after) = h.send(Method::GET, "/v1/donations/status", None, None).await;
        assert_eq!(after["isLive"], false);
    }

    #[tokio::test]
    async fn test_leave_without_session_is_not_found() {
        let h = harness().await;
        let token = h.token(Uuid::new_v4(), "Bravo", Role::User);

        let (status, _) = h
            .send(Method::DELETE, "/v1/donations/queue", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
