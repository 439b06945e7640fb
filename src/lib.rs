//! coupon-drop: hand out single-use coupon codes from a shared pool, one per
//! visitor per cooldown window.
//!
//! Visitors are identified by source IP and an opaque `couponUserId` cookie;
//! either one matching a past claim puts them on cooldown.

use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod cooldown;
pub mod error;
pub mod identity;
pub mod model;
pub mod routes;
pub mod seed;
pub mod service;
pub mod store;
pub mod throttle;

use config::Config;
use cooldown::Cooldown;
use service::ClaimService;
use store::CouponStore;
use throttle::RequestThrottle;

/// Shared application state passed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub service: ClaimService,
    /// Per-IP request budget for the API routes.
    pub throttle: Arc<RequestThrottle>,
    pub api_prefix: String,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn CouponStore>, config: &Config) -> Self {
        Self {
            service: ClaimService::new(store, Cooldown::from_minutes(config.cooldown_minutes)),
            throttle: Arc::new(RequestThrottle::new(
                config.request_limit,
                Duration::from_secs(config.request_window_seconds),
            )),
            api_prefix: config.api_prefix.clone(),
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }
}
