//! Liveness and readiness checks

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;
use t513_common::db::schema;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness of each dependency the donation routes need
#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: Check,
    pub schema: Check,
}

#[derive(Serialize)]
pub struct Check {
    pub up: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Check {
    fn from_result<T, E: std::fmt::Display>(result: Result<T, E>, started: Instant) -> Self {
        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => Self { up: true, latency_ms, error: None },
            Err(e) => Self { up: false, latency_ms, error: Some(e.to_string()) },
        }
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: t513_common::VERSION,
    })
}

/// 503 until the database answers and the donation tables and the
/// single-active index exist. Relevant when `bootstrap_schema` is off.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let started = Instant::now();
    let database = Check::from_result(state.db.ping().await, started);

    let schema = if database.up {
        let started = Instant::now();
        Check::from_result(schema::verify(state.db.write()).await, started)
    } else {
        Check {
            up: false,
            latency_ms: 0,
            error: Some("database unreachable".to_string()),
        }
    };

    if !schema.up {
        tracing::warn!(error = ?schema.error, "Donation schema not ready");
    }

    let ready = database.up && schema.up;
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(ReadyResponse {
        status: if ready { "ready" } else { "not_ready" },
        database,
        schema,
    }))
}
