use axum::{routing::get, Router};
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::geoip::GeoResolver;
use crate::limits::RateLimiter;
use crate::rotation::RotationMemory;
use crate::storage::{LinkResolver, Storage};
use crate::volatile::VolatileStore;

use super::handlers::{dispatch, health_check, DispatchState};

pub fn create_dispatch_router(
    storage: Arc<dyn Storage>,
    volatile: Arc<dyn VolatileStore>,
    geo: Arc<GeoResolver>,
    limits: RateLimitConfig,
) -> Router {
    let state = Arc::new(DispatchState {
        resolver: LinkResolver::new(Arc::clone(&storage), Arc::clone(&volatile)),
        limiter: RateLimiter::new(Arc::clone(&volatile)),
        rotation: RotationMemory::new(volatile),
        geo,
        storage,
        limits,
    });

    Router::new()
        .route("/", get(health_check))
        .route("/v1/{business_unit}/{link_id}", get(dispatch))
        .with_state(state)
}
