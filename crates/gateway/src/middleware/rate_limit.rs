//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use t513_common::errors::AppError;

/// Global limiter shared by every request
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<DefaultDirectRateLimiter>,
    requests_per_second: u32,
}

/// Create a new rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<RateLimit, AppError> {
    let per_second = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.requests_per_second must be positive".to_string(),
    })?;
    let burst = NonZeroU32::new(burst).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.burst must be positive".to_string(),
    })?;

    let quota = Quota::per_second(per_second).allow_burst(burst);

    Ok(RateLimit {
        limiter: Arc::new(RateLimiter::direct(quota)),
        requests_per_second,
    })
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(limit): State<RateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limit.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.requests_per_second,
            })
        }
    }
}
