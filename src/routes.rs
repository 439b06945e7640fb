//! Axum router and HTTP handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::ClaimError;
use crate::identity::{ProxyTrust, ResolvedIdentity};
use crate::model::HistoryEntry;
use crate::throttle::throttle_requests;
use crate::AppState;

const CLAIMED_MESSAGE: &str = "Coupon claimed successfully!";
const CLAIM_FAILED: &str = "An error occurred while claiming the coupon.";
const STATUS_FAILED: &str = "An error occurred while checking claim status.";
const HISTORY_FAILED: &str = "An error occurred while fetching your coupon history.";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/claim", post(claim))
        .route("/status", get(status))
        .route("/history", get(history))
        .route_layer(middleware::from_fn_with_state(
            state.throttle.clone(),
            throttle_requests,
        ))
        .route("/health", get(health))
        .with_state(state.clone());

    let prefix = normalize_prefix(&state.api_prefix);
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    app.layer(Extension(ProxyTrust(state.trust_proxy_headers)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// `"api/"` -> `"/api"`, `"/"` -> `""`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CouponBody {
    code: String,
}

#[derive(Serialize)]
struct ClaimResponse {
    success: bool,
    message: &'static str,
    coupon: CouponBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CooldownResponse {
    success: bool,
    message: String,
    minutes_remaining: u64,
}

#[derive(Serialize)]
struct FailureResponse {
    success: bool,
    message: &'static str,
}

impl FailureResponse {
    fn new(message: &'static str) -> Json<Self> {
        Json(Self {
            success: false,
            message,
        })
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    success: bool,
    coupons: Vec<HistoryEntry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /claim`: hand out the next coupon if the caller is off cooldown.
async fn claim(State(state): State<AppState>, who: ResolvedIdentity) -> Response {
    let cookie = who.response_headers();
    let ip = who.identity.ip_address.clone();

    match state.service.claim(who.identity).await {
        Ok(coupon) => (
            StatusCode::OK,
            cookie,
            Json(ClaimResponse {
                success: true,
                message: CLAIMED_MESSAGE,
                coupon: CouponBody { code: coupon.code },
            }),
        )
            .into_response(),
        Err(ClaimError::CooldownActive { minutes_remaining }) => {
            info!(%ip, minutes_remaining, "claim rejected, cooldown active");
            (
                StatusCode::TOO_MANY_REQUESTS,
                cookie,
                Json(CooldownResponse {
                    success: false,
                    message: format!(
                        "You can claim another coupon in {minutes_remaining} minutes."
                    ),
                    minutes_remaining,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, %ip, "claim failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                cookie,
                FailureResponse::new(CLAIM_FAILED),
            )
                .into_response()
        }
    }
}

/// `GET /status`: whether the caller may claim now, and if not, how long to wait.
async fn status(State(state): State<AppState>, who: ResolvedIdentity) -> Response {
    let cookie = who.response_headers();
    match state.service.status(who.identity).await {
        Ok(status) => (StatusCode::OK, cookie, Json(status)).into_response(),
        Err(e) => {
            error!(error = %e, "status check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                cookie,
                FailureResponse::new(STATUS_FAILED),
            )
                .into_response()
        }
    }
}

/// `GET /history`: the caller's past claims, newest first.
async fn history(State(state): State<AppState>, who: ResolvedIdentity) -> Response {
    let cookie = who.response_headers();
    match state.service.history(who.identity).await {
        Ok(coupons) => (
            StatusCode::OK,
            cookie,
            Json(HistoryResponse {
                success: true,
                coupons,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "history lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                cookie,
                FailureResponse::new(HISTORY_FAILED),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "API is running",
    })
}
