//! Observability: structured logging, OTLP tracing, and Prometheus metrics.

use crate::config::ObservabilityConfig;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber: env filter, JSON or pretty fmt
/// layer, and an optional OTLP exporter layered in when configured.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.as_str()),
            )
            .with_trace_config(opentelemetry_sdk::trace::config().with_resource(
                opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )]),
            ))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        let registry = tracing_subscriber::registry().with(filter).with(telemetry_layer);
        if config.json_logging {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    } else {
        let registry = tracing_subscriber::registry().with(filter);
        if config.json_logging {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    Ok(())
}

pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Current trace/span id, for correlating a log line with its OTLP span.
pub struct Tracer;

impl Tracer {
    pub fn current_trace_id() -> Option<String> {
        let ctx = Context::current();
        let span_ctx = ctx.span().span_context().clone();
        span_ctx.is_valid().then(|| span_ctx.trace_id().to_string())
    }
}

/// Metric names and registration, matching §6's Observation list exactly.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

    pub fn register_metrics() {
        describe_counter!("negotiation_rfps_published_total", "RFPs published");
        describe_counter!("negotiation_bids_placed_total", "Bids placed");
        describe_counter!("negotiation_rfps_awarded_total", "RFPs awarded");
        describe_counter!("negotiation_rfps_expired_total", "RFPs expired");
        describe_counter!("negotiation_bids_withdrawn_total", "Bids withdrawn");
        describe_counter!("negotiation_bonds_forfeited_total", "Bid bonds forfeited");
        describe_histogram!("negotiation_bid_score", "Computed bid scores");
        describe_histogram!(
            "negotiation_time_to_award_seconds",
            "Seconds from RFP publish to award"
        );
        describe_gauge!(
            "negotiation_ws_active_connections",
            "Currently connected realtime websocket clients"
        );
        describe_counter!(
            "negotiation_ws_broadcasts_dropped_total",
            "Realtime broadcasts dropped due to a full client queue"
        );
    }

    pub fn record_rfp_published() {
        counter!("negotiation_rfps_published_total").increment(1);
    }

    pub fn record_bid_placed(score: f64) {
        counter!("negotiation_bids_placed_total").increment(1);
        histogram!("negotiation_bid_score").record(score);
    }

    pub fn record_rfp_awarded(seconds_since_publish: f64) {
        counter!("negotiation_rfps_awarded_total").increment(1);
        histogram!("negotiation_time_to_award_seconds").record(seconds_since_publish);
    }

    pub fn record_rfp_expired() {
        counter!("negotiation_rfps_expired_total").increment(1);
    }

    pub fn record_bid_withdrawn() {
        counter!("negotiation_bids_withdrawn_total").increment(1);
    }

    pub fn record_bond_forfeited() {
        counter!("negotiation_bonds_forfeited_total").increment(1);
    }

    pub fn set_ws_active_connections(count: u64) {
        gauge!("negotiation_ws_active_connections").set(count as f64);
    }

    pub fn record_ws_broadcast_dropped() {
        counter!("negotiation_ws_broadcasts_dropped_total").increment(1);
    }
}

/// One variant per notable state transition (§6 Observation). Emitted
/// inline at the point of the transition, never buffered or deferred.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type")]
pub enum NegotiationEvent {
    RfpPublished { rfp_id: String, buyer_addr: String },
    BidPlaced { rfp_id: String, bid_id: String, score: f64 },
    BidCountered { rfp_id: String, parent_bid_id: String, counter_bid_id: String },
    RfpAwarded { rfp_id: String, winner_count: usize, seconds_since_publish: f64 },
    RfpExpired { rfp_id: String },
    RfpCancelled { rfp_id: String, reason: Option<String> },
    BidWithdrawn { rfp_id: String, bid_id: String },
    BondForfeited { rfp_id: String, bid_id: String, amount: f64 },
    SweepTick { auto_selected: usize, expired: usize, selecting: usize },
}

impl NegotiationEvent {
    pub fn log(&self) {
        match self {
            NegotiationEvent::RfpPublished { rfp_id, buyer_addr } => {
                tracing::info!(rfp_id = %rfp_id, buyer_addr = %buyer_addr, "rfp published");
                metrics::record_rfp_published();
            }
            NegotiationEvent::BidPlaced { rfp_id, bid_id, score } => {
                tracing::info!(rfp_id = %rfp_id, bid_id = %bid_id, score = %score, "bid placed");
                metrics::record_bid_placed(*score);
            }
            NegotiationEvent::BidCountered { rfp_id, parent_bid_id, counter_bid_id } => {
                tracing::info!(
                    rfp_id = %rfp_id,
                    parent_bid_id = %parent_bid_id,
                    counter_bid_id = %counter_bid_id,
                    "bid countered"
                );
            }
            NegotiationEvent::RfpAwarded { rfp_id, winner_count, seconds_since_publish } => {
                tracing::info!(
                    rfp_id = %rfp_id,
                    winner_count = %winner_count,
                    seconds_since_publish = %seconds_since_publish,
                    "rfp awarded"
                );
                metrics::record_rfp_awarded(*seconds_since_publish);
            }
            NegotiationEvent::RfpExpired { rfp_id } => {
                tracing::info!(rfp_id = %rfp_id, "rfp expired");
                metrics::record_rfp_expired();
            }
            NegotiationEvent::RfpCancelled { rfp_id, reason } => {
                tracing::info!(rfp_id = %rfp_id, reason = ?reason, "rfp cancelled");
            }
            NegotiationEvent::BidWithdrawn { rfp_id, bid_id } => {
                tracing::info!(rfp_id = %rfp_id, bid_id = %bid_id, "bid withdrawn");
                metrics::record_bid_withdrawn();
            }
            NegotiationEvent::BondForfeited { rfp_id, bid_id, amount } => {
                tracing::warn!(rfp_id = %rfp_id, bid_id = %bid_id, amount = %amount, "bond forfeited");
                metrics::record_bond_forfeited();
            }
            NegotiationEvent::SweepTick { auto_selected, expired, selecting } => {
                tracing::debug!(
                    auto_selected = %auto_selected,
                    expired = %expired,
                    selecting = %selecting,
                    "sweep tick complete"
                );
            }
        }
    }
}
