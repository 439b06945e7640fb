//! Per-IP request throttle for the API routes.
//!
//! Independent of the claim cooldown: this caps raw request volume in a
//! fixed window, in process, and resets on restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use tracing::warn;

use crate::identity::{client_ip, ProxyTrust};

pub const THROTTLED_MESSAGE: &str = "Too many requests from this IP, please try again later.";

struct Window {
    started: Instant,
    hits: u32,
}

pub struct RequestThrottle {
    windows: Mutex<HashMap<IpAddr, Window>>,
    limit: u32,
    window: Duration,
}

impl RequestThrottle {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0 && !self.window.is_zero()
    }

    /// Count one request from `ip` at `now`; false once the window is full.
    pub fn try_acquire_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let mut windows = self.windows.lock();

        // Keep the map from growing with every address ever seen.
        if windows.len() > 10_000 {
            windows.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let entry = windows.entry(ip).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.hits = 0;
        }
        if entry.hits >= self.limit {
            return false;
        }
        entry.hits += 1;
        true
    }

    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        self.try_acquire_at(ip, Instant::now())
    }
}

/// Axum middleware rejecting callers over the per-IP request budget.
pub async fn throttle_requests(
    State(throttle): State<Arc<RequestThrottle>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let trust = parts.extensions.get::<ProxyTrust>().copied().unwrap_or_default();
    let ip = client_ip(&parts, trust);

    if !throttle.try_acquire(ip) {
        warn!(%ip, "request throttled");
        return (StatusCode::TOO_MANY_REQUESTS, THROTTLED_MESSAGE).into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
