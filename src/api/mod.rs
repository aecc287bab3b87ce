//! HTTP API for the negotiation engine.
//!
//! A single `/v1` surface (§6): RFP lifecycle, bid lifecycle, templates,
//! per-agent listings, and admin analytics, plus unversioned `/health`,
//! `/metrics`, and `/ws`.

mod auth;
mod dto;
mod handlers;
mod websocket;

use crate::health::HealthService;
use crate::realtime::RealtimeHub;
use crate::service::Service;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub health: Arc<HealthService>,
    pub hub: Option<RealtimeHub>,
    pub metrics_handle: PrometheusHandle,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let v1 = Router::new()
        .route("/rfps", post(handlers::publish_rfp).get(handlers::list_open_rfps))
        .route("/rfps/:id", get(handlers::get_rfp))
        .route("/rfps/:id/bids", get(handlers::list_bids).post(handlers::place_bid))
        .route("/rfps/:id/bids/:bid_id/counter", post(handlers::counter))
        .route("/rfps/:id/bids/:bid_id/withdraw", post(handlers::withdraw_bid))
        .route("/rfps/:id/select", post(handlers::select_winners))
        .route("/rfps/:id/cancel", post(handlers::cancel_rfp))
        .route("/rfps/from-template/:template_id", post(handlers::publish_from_template))
        .route("/rfp-templates", get(handlers::list_templates).post(handlers::create_template))
        .route(
            "/rfp-templates/:template_id",
            get(handlers::get_template).delete(handlers::delete_template),
        )
        .route("/agents/:address/rfps", get(handlers::agent_rfps))
        .route("/admin/negotiation/analytics", get(handlers::analytics));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/ws", get(websocket::ws_handler))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
