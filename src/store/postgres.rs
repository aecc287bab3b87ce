//! Postgres-backed Store. Decimal fields are bound/selected as text and cast
//! to/from `numeric` in SQL, keeping the decimal-as-string wire convention
//! (§9) without requiring a bignum sqlx feature.

use super::{AnalyticsSummary, Store};
use crate::domain::{
    Bid, BidId, BidStatus, BondStatus, Rfp, RfpId, RfpStatus, ScoringWeights, Template, TemplateId,
};
use crate::error::{NegotiationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use uuid::Uuid;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(NegotiationError::from)?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| NegotiationError::internal("running migrations", e))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct RfpRow {
    id: Uuid,
    buyer_addr: String,
    service_type: String,
    min_budget: String,
    max_budget: String,
    max_latency_ms: i64,
    min_success_rate: f64,
    duration_secs: i64,
    min_volume: i64,
    bid_deadline: DateTime<Utc>,
    auto_select: bool,
    min_reputation: f64,
    max_counter_rounds: i32,
    required_bond_pct: f64,
    no_withdraw_window_secs: Option<i64>,
    max_winners: i32,
    sealed_bids: bool,
    weight_price: f64,
    weight_reputation: f64,
    weight_sla: f64,
    status: String,
    winning_bid_ids: Vec<Uuid>,
    contract_ids: Vec<String>,
    bid_count: i64,
    cancel_reason: Option<String>,
    awarded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RfpRow {
    fn into_domain(self) -> Rfp {
        Rfp {
            id: RfpId(self.id),
            buyer_addr: self.buyer_addr,
            service_type: self.service_type,
            min_budget: self.min_budget,
            max_budget: self.max_budget,
            max_latency_ms: self.max_latency_ms,
            min_success_rate: self.min_success_rate,
            duration_secs: self.duration_secs,
            min_volume: self.min_volume,
            bid_deadline: self.bid_deadline,
            auto_select: self.auto_select,
            min_reputation: self.min_reputation,
            max_counter_rounds: self.max_counter_rounds,
            required_bond_pct: self.required_bond_pct,
            no_withdraw_window_secs: self.no_withdraw_window_secs,
            max_winners: self.max_winners,
            sealed_bids: self.sealed_bids,
            scoring_weights: ScoringWeights {
                price: self.weight_price,
                reputation: self.weight_reputation,
                sla: self.weight_sla,
            },
            status: RfpStatus::from_str_opt(&self.status).unwrap_or(RfpStatus::Open),
            winning_bid_ids: self.winning_bid_ids.into_iter().map(BidId).collect(),
            contract_ids: self.contract_ids,
            bid_count: self.bid_count,
            cancel_reason: self.cancel_reason,
            awarded_at: self.awarded_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct BidRow {
    id: Uuid,
    rfp_id: Uuid,
    seller_addr: String,
    price_per_call: String,
    total_budget: String,
    latency_ms: i64,
    success_rate: f64,
    duration_secs: i64,
    seller_penalty: String,
    status: String,
    score: f64,
    counter_round: i32,
    parent_bid_id: Option<Uuid>,
    countered_by_id: Option<Uuid>,
    bond_amount: String,
    bond_status: String,
    message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BidRow {
    fn into_domain(self) -> Bid {
        Bid {
            id: BidId(self.id),
            rfp_id: RfpId(self.rfp_id),
            seller_addr: self.seller_addr,
            price_per_call: self.price_per_call,
            total_budget: self.total_budget,
            latency_ms: self.latency_ms,
            success_rate: self.success_rate,
            duration_secs: self.duration_secs,
            seller_penalty: self.seller_penalty,
            status: BidStatus::from_str_opt(&self.status).unwrap_or(BidStatus::Pending),
            score: self.score,
            counter_round: self.counter_round,
            parent_bid_id: self.parent_bid_id.map(BidId),
            countered_by_id: self.countered_by_id.map(BidId),
            bond_amount: self.bond_amount,
            bond_status: BondStatus::from_str_opt(&self.bond_status).unwrap_or(BondStatus::None),
            message: self.message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct TemplateRow {
    id: Uuid,
    owner_addr: String,
    name: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TemplateRow {
    fn into_domain(self) -> Template {
        Template {
            id: TemplateId(self.id),
            owner_addr: self.owner_addr,
            name: self.name,
            payload: self.payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const RFP_COLUMNS: &str = "id, buyer_addr, service_type, min_budget::text as min_budget, \
    max_budget::text as max_budget, max_latency_ms, min_success_rate, duration_secs, \
    min_volume, bid_deadline, auto_select, min_reputation, max_counter_rounds, \
    required_bond_pct, no_withdraw_window_secs, max_winners, sealed_bids, weight_price, \
    weight_reputation, weight_sla, status, winning_bid_ids, contract_ids, bid_count, \
    cancel_reason, awarded_at, created_at, updated_at";

const BID_COLUMNS: &str = "id, rfp_id, seller_addr, price_per_call::text as price_per_call, \
    total_budget::text as total_budget, latency_ms, success_rate, duration_secs, \
    seller_penalty::text as seller_penalty, status, score, counter_round, parent_bid_id, \
    countered_by_id, bond_amount::text as bond_amount, bond_status, message, created_at, \
    updated_at";

#[async_trait]
impl Store for PostgresStore {
    async fn create_rfp(&self, rfp: &Rfp) -> Result<()> {
        sqlx::query(
            "INSERT INTO rfps (id, buyer_addr, service_type, min_budget, max_budget, \
             max_latency_ms, min_success_rate, duration_secs, min_volume, bid_deadline, \
             auto_select, min_reputation, max_counter_rounds, required_bond_pct, \
             no_withdraw_window_secs, max_winners, sealed_bids, weight_price, \
             weight_reputation, weight_sla, status, winning_bid_ids, contract_ids, \
             bid_count, cancel_reason, awarded_at, created_at, updated_at) \
             VALUES ($1,$2,$3,$4::numeric,$5::numeric,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15, \
             $16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26,$27,$28)",
        )
        .bind(rfp.id.0)
        .bind(&rfp.buyer_addr)
        .bind(&rfp.service_type)
        .bind(&rfp.min_budget)
        .bind(&rfp.max_budget)
        .bind(rfp.max_latency_ms)
        .bind(rfp.min_success_rate)
        .bind(rfp.duration_secs)
        .bind(rfp.min_volume)
        .bind(rfp.bid_deadline)
        .bind(rfp.auto_select)
        .bind(rfp.min_reputation)
        .bind(rfp.max_counter_rounds)
        .bind(rfp.required_bond_pct)
        .bind(rfp.no_withdraw_window_secs)
        .bind(rfp.max_winners)
        .bind(rfp.sealed_bids)
        .bind(rfp.scoring_weights.price)
        .bind(rfp.scoring_weights.reputation)
        .bind(rfp.scoring_weights.sla)
        .bind(rfp.status.as_str())
        .bind(rfp.winning_bid_ids.iter().map(|b| b.0).collect::<Vec<_>>())
        .bind(&rfp.contract_ids)
        .bind(rfp.bid_count)
        .bind(&rfp.cancel_reason)
        .bind(rfp.awarded_at)
        .bind(rfp.created_at)
        .bind(rfp.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rfp(&self, id: RfpId) -> Result<Option<Rfp>> {
        let row: Option<RfpRow> =
            sqlx::query_as(&format!("SELECT {RFP_COLUMNS} FROM rfps WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(RfpRow::into_domain))
    }

    async fn update_rfp(&self, rfp: &Rfp) -> Result<()> {
        let result = sqlx::query(
            "UPDATE rfps SET status=$2, winning_bid_ids=$3, contract_ids=$4, bid_count=$5, \
             cancel_reason=$6, awarded_at=$7, updated_at=$8 WHERE id=$1",
        )
        .bind(rfp.id.0)
        .bind(rfp.status.as_str())
        .bind(rfp.winning_bid_ids.iter().map(|b| b.0).collect::<Vec<_>>())
        .bind(&rfp.contract_ids)
        .bind(rfp.bid_count)
        .bind(&rfp.cancel_reason)
        .bind(rfp.awarded_at)
        .bind(rfp.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(NegotiationError::not_found("RFP", rfp.id));
        }
        Ok(())
    }

    async fn list_open_rfps(&self, service_type: Option<&str>, limit: i64) -> Result<Vec<Rfp>> {
        let rows: Vec<RfpRow> = match service_type {
            Some(t) => {
                sqlx::query_as(&format!(
                    "SELECT {RFP_COLUMNS} FROM rfps WHERE status='open' AND service_type=$1 \
                     ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(t)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {RFP_COLUMNS} FROM rfps WHERE status='open' \
                     ORDER BY created_at DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(RfpRow::into_domain).collect())
    }

    async fn list_rfps_by_buyer(&self, buyer_addr: &str) -> Result<Vec<Rfp>> {
        let rows: Vec<RfpRow> = sqlx::query_as(&format!(
            "SELECT {RFP_COLUMNS} FROM rfps WHERE buyer_addr=$1 ORDER BY created_at DESC"
        ))
        .bind(buyer_addr)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RfpRow::into_domain).collect())
    }

    async fn list_expired_non_auto_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let rows: Vec<RfpRow> = sqlx::query_as(&format!(
            "SELECT {RFP_COLUMNS} FROM rfps WHERE status='open' AND auto_select=false \
             AND bid_deadline < $1 LIMIT $2"
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RfpRow::into_domain).collect())
    }

    async fn list_auto_select_ready_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let rows: Vec<RfpRow> = sqlx::query_as(&format!(
            "SELECT {RFP_COLUMNS} FROM rfps WHERE status='open' AND auto_select=true \
             AND bid_deadline < $1 LIMIT $2"
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RfpRow::into_domain).collect())
    }

    async fn list_stale_selecting_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let rows: Vec<RfpRow> = sqlx::query_as(&format!(
            "SELECT {RFP_COLUMNS} FROM rfps WHERE status='selecting' AND updated_at < $1 LIMIT $2"
        ))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RfpRow::into_domain).collect())
    }

    async fn create_bid(&self, bid: &Bid) -> Result<()> {
        sqlx::query(
            "INSERT INTO bids (id, rfp_id, seller_addr, price_per_call, total_budget, \
             latency_ms, success_rate, duration_secs, seller_penalty, status, score, \
             counter_round, parent_bid_id, countered_by_id, bond_amount, bond_status, \
             message, created_at, updated_at) \
             VALUES ($1,$2,$3,$4::numeric,$5::numeric,$6,$7,$8,$9::numeric,$10,$11,$12, \
             $13,$14,$15::numeric,$16,$17,$18,$19)",
        )
        .bind(bid.id.0)
        .bind(bid.rfp_id.0)
        .bind(&bid.seller_addr)
        .bind(&bid.price_per_call)
        .bind(&bid.total_budget)
        .bind(bid.latency_ms)
        .bind(bid.success_rate)
        .bind(bid.duration_secs)
        .bind(&bid.seller_penalty)
        .bind(bid.status.as_str())
        .bind(bid.score)
        .bind(bid.counter_round)
        .bind(bid.parent_bid_id.map(|b| b.0))
        .bind(bid.countered_by_id.map(|b| b.0))
        .bind(&bid.bond_amount)
        .bind(bid.bond_status.as_str())
        .bind(&bid.message)
        .bind(bid.created_at)
        .bind(bid.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bid(&self, id: BidId) -> Result<Option<Bid>> {
        let row: Option<BidRow> =
            sqlx::query_as(&format!("SELECT {BID_COLUMNS} FROM bids WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(BidRow::into_domain))
    }

    async fn update_bid(&self, bid: &Bid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE bids SET status=$2, score=$3, countered_by_id=$4, bond_amount=$5::numeric, \
             bond_status=$6, updated_at=$7 WHERE id=$1",
        )
        .bind(bid.id.0)
        .bind(bid.status.as_str())
        .bind(bid.score)
        .bind(bid.countered_by_id.map(|b| b.0))
        .bind(&bid.bond_amount)
        .bind(bid.bond_status.as_str())
        .bind(bid.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(NegotiationError::not_found("Bid", bid.id));
        }
        Ok(())
    }

    async fn list_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>> {
        let rows: Vec<BidRow> = sqlx::query_as(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE rfp_id=$1 ORDER BY created_at ASC"
        ))
        .bind(rfp_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BidRow::into_domain).collect())
    }

    async fn list_pending_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>> {
        let rows: Vec<BidRow> = sqlx::query_as(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE rfp_id=$1 AND status='pending' \
             ORDER BY score DESC"
        ))
        .bind(rfp_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BidRow::into_domain).collect())
    }

    async fn get_pending_bid_by_seller(
        &self,
        rfp_id: RfpId,
        seller_addr: &str,
    ) -> Result<Option<Bid>> {
        let row: Option<BidRow> = sqlx::query_as(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE rfp_id=$1 AND seller_addr=$2 \
             AND status='pending' LIMIT 1"
        ))
        .bind(rfp_id.0)
        .bind(seller_addr)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(BidRow::into_domain))
    }

    async fn list_bids_by_seller(&self, seller_addr: &str) -> Result<Vec<Bid>> {
        let rows: Vec<BidRow> = sqlx::query_as(&format!(
            "SELECT {BID_COLUMNS} FROM bids WHERE seller_addr=$1 ORDER BY created_at DESC"
        ))
        .bind(seller_addr)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BidRow::into_domain).collect())
    }

    async fn analytics(&self) -> Result<AnalyticsSummary> {
        let total_rfps: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rfps")
            .fetch_one(&self.pool)
            .await?;
        let open_rfps: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rfps WHERE status='open'")
                .fetch_one(&self.pool)
                .await?;
        let awarded_rfps: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rfps WHERE status='awarded'")
                .fetch_one(&self.pool)
                .await?;
        let expired_rfps: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rfps WHERE status='expired'")
                .fetch_one(&self.pool)
                .await?;
        let cancelled_rfps: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rfps WHERE status='cancelled'")
                .fetch_one(&self.pool)
                .await?;
        let total_bids: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bids")
            .fetch_one(&self.pool)
            .await?;
        let pending_bids: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bids WHERE status='pending'")
                .fetch_one(&self.pool)
                .await?;
        let average_bid_score: Option<f64> =
            sqlx::query_scalar("SELECT AVG(score) FROM bids")
                .fetch_one(&self.pool)
                .await?;

        Ok(AnalyticsSummary {
            total_rfps,
            open_rfps,
            awarded_rfps,
            expired_rfps,
            cancelled_rfps,
            total_bids,
            pending_bids,
            average_bid_score: average_bid_score.unwrap_or(0.0),
        })
    }

    async fn create_template(&self, template: &Template) -> Result<()> {
        sqlx::query(
            "INSERT INTO rfp_templates (id, owner_addr, name, payload, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(template.id.0)
        .bind(&template.owner_addr)
        .bind(&template.name)
        .bind(&template.payload)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, owner_addr, name, payload, created_at, updated_at \
             FROM rfp_templates WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TemplateRow::into_domain))
    }

    async fn list_templates(&self, owner_addr: &str) -> Result<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT id, owner_addr, name, payload, created_at, updated_at FROM rfp_templates \
             WHERE owner_addr = $1 OR owner_addr = '' ORDER BY created_at DESC",
        )
        .bind(owner_addr)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TemplateRow::into_domain).collect())
    }

    async fn delete_template(&self, id: TemplateId) -> Result<()> {
        let result = sqlx::query("DELETE FROM rfp_templates WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NegotiationError::not_found("Template", id));
        }
        Ok(())
    }
}
