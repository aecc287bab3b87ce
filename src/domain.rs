//! Core domain types: RFP, Bid, Template, and their lifecycle enums.
//!
//! Money and percentage fields are persisted and serialised as decimal
//! strings (bit-compatible JSON wire format) but parsed permissively as
//! floats for computation; a parse failure yields `0.0`, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(RfpId);
id_newtype!(BidId);
id_newtype!(TemplateId);

/// Parse a decimal string permissively; parse failures yield `0.0`, not an error.
pub fn parse_decimal(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(0.0)
}

/// Render a float as a decimal string with six fractional digits (bond amounts).
pub fn format_decimal6(v: f64) -> String {
    format!("{:.6}", v)
}

/// Clamp a value into `[lo, hi]`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Parse a free-standing duration of the form `"<number><unit>"` where
/// `unit` is `h` (hours), `m` (minutes), or `d` (24-hour days). Returns
/// `None` if `s` does not match that shape.
pub fn parse_simple_duration(s: &str) -> Option<chrono::Duration> {
    let s = s.trim();
    let (number, unit) = s.split_at(s.len().checked_sub(1)?);
    let n: f64 = number.parse().ok()?;
    if n <= 0.0 {
        return None;
    }
    let millis = match unit {
        "h" => n * 3_600_000.0,
        "m" => n * 60_000.0,
        "d" => n * 24.0 * 3_600_000.0,
        _ => return None,
    };
    Some(chrono::Duration::milliseconds(millis as i64))
}

/// Parse `bidDeadline` (§4.3 PublishRFP): either an RFC3339 instant, or a
/// positive duration (`"24h"`, `"7d"`, `"30m"`) taken relative to `now`.
/// Rejects instants in the past.
pub fn parse_bid_deadline(
    s: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, &'static str> {
    let deadline = if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        instant.with_timezone(&Utc)
    } else if let Some(duration) = parse_simple_duration(s) {
        now + duration
    } else {
        return Err("bidDeadline must be an RFC3339 instant or a duration like \"24h\"/\"7d\"/\"30m\"");
    };

    if deadline <= now {
        return Err("bidDeadline must be in the future");
    }
    Ok(deadline)
}

/// Parse an optional `noWithdrawWindow` duration string, per PublishRFP (§4.3).
pub fn parse_no_withdraw_window(s: &str) -> Result<chrono::Duration, &'static str> {
    parse_simple_duration(s).ok_or("noWithdrawWindow must be a duration like \"1h\"/\"30m\"/\"1d\"")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfpStatus {
    Open,
    Selecting,
    Awarded,
    Expired,
    Cancelled,
}

impl RfpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RfpStatus::Open => "open",
            RfpStatus::Selecting => "selecting",
            RfpStatus::Awarded => "awarded",
            RfpStatus::Expired => "expired",
            RfpStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "open" => Some(RfpStatus::Open),
            "selecting" => Some(RfpStatus::Selecting),
            "awarded" => Some(RfpStatus::Awarded),
            "expired" => Some(RfpStatus::Expired),
            "cancelled" => Some(RfpStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RfpStatus::Awarded | RfpStatus::Expired | RfpStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
    Countered,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::Rejected => "rejected",
            BidStatus::Withdrawn => "withdrawn",
            BidStatus::Countered => "countered",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BidStatus::Pending),
            "accepted" => Some(BidStatus::Accepted),
            "rejected" => Some(BidStatus::Rejected),
            "withdrawn" => Some(BidStatus::Withdrawn),
            "countered" => Some(BidStatus::Countered),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BidStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondStatus {
    None,
    Held,
    Released,
    Forfeited,
}

impl BondStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BondStatus::None => "none",
            BondStatus::Held => "held",
            BondStatus::Released => "released",
            BondStatus::Forfeited => "forfeited",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "none" => Some(BondStatus::None),
            "held" => Some(BondStatus::Held),
            "released" => Some(BondStatus::Released),
            "forfeited" => Some(BondStatus::Forfeited),
            _ => None,
        }
    }
}

/// Weights used by the Scorer. Not required to sum to 1; consumers must not assume it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub price: f64,
    pub reputation: f64,
    pub sla: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            price: 0.30,
            reputation: 0.40,
            sla: 0.30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfp {
    pub id: RfpId,
    pub buyer_addr: String,
    pub service_type: String,
    pub min_budget: String,
    pub max_budget: String,
    pub max_latency_ms: i64,
    pub min_success_rate: f64,
    pub duration_secs: i64,
    pub min_volume: i64,
    pub bid_deadline: DateTime<Utc>,
    pub auto_select: bool,
    pub min_reputation: f64,
    pub max_counter_rounds: i32,
    pub required_bond_pct: f64,
    pub no_withdraw_window_secs: Option<i64>,
    pub max_winners: i32,
    pub sealed_bids: bool,
    pub scoring_weights: ScoringWeights,
    pub status: RfpStatus,
    pub winning_bid_ids: Vec<BidId>,
    pub contract_ids: Vec<String>,
    pub bid_count: i64,
    pub cancel_reason: Option<String>,
    pub awarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rfp {
    /// First element of `winning_bid_ids`, for callers expecting a single winner.
    pub fn winning_bid_id(&self) -> Option<BidId> {
        self.winning_bid_ids.first().copied()
    }

    /// First element of `contract_ids`, for callers expecting a single contract.
    pub fn contract_id(&self) -> Option<&str> {
        self.contract_ids.first().map(|s| s.as_str())
    }

    pub fn max_budget_f64(&self) -> f64 {
        parse_decimal(&self.max_budget)
    }

    pub fn min_budget_f64(&self) -> f64 {
        parse_decimal(&self.min_budget)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: BidId,
    pub rfp_id: RfpId,
    pub seller_addr: String,
    pub price_per_call: String,
    pub total_budget: String,
    pub latency_ms: i64,
    pub success_rate: f64,
    pub duration_secs: i64,
    pub seller_penalty: String,
    pub status: BidStatus,
    pub score: f64,
    pub counter_round: i32,
    pub parent_bid_id: Option<BidId>,
    pub countered_by_id: Option<BidId>,
    pub bond_amount: String,
    pub bond_status: BondStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    pub fn total_budget_f64(&self) -> f64 {
        parse_decimal(&self.total_budget)
    }

    pub fn bond_amount_f64(&self) -> f64 {
        parse_decimal(&self.bond_amount)
    }

    /// Redact seller-economics fields for sealed, still-open RFPs (§6).
    pub fn redacted(mut self) -> Self {
        self.price_per_call = "".to_string();
        self.total_budget = "".to_string();
        self.message = None;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    /// Empty string denotes a system-wide template visible to every buyer.
    pub owner_addr: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn is_system_wide(&self) -> bool {
        self.owner_addr.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parse_failure_yields_zero() {
        assert_eq!(parse_decimal("not-a-number"), 0.0);
        assert_eq!(parse_decimal(""), 0.0);
    }

    #[test]
    fn decimal_parse_success() {
        assert_eq!(parse_decimal("0.75"), 0.75);
        assert_eq!(parse_decimal("  1.5  "), 1.5);
    }

    #[test]
    fn bond_format_has_six_fractional_digits() {
        assert_eq!(format_decimal6(0.075), "0.075000");
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            RfpStatus::Open,
            RfpStatus::Selecting,
            RfpStatus::Awarded,
            RfpStatus::Expired,
            RfpStatus::Cancelled,
        ] {
            assert_eq!(RfpStatus::from_str_opt(s.as_str()), Some(s));
        }
    }

    #[test]
    fn bid_deadline_parses_rfc3339_instant() {
        let now = Utc::now();
        let future = now + chrono::Duration::hours(48);
        let parsed = parse_bid_deadline(&future.to_rfc3339(), now).unwrap();
        assert_eq!(parsed.timestamp(), future.timestamp());
    }

    #[test]
    fn bid_deadline_parses_duration_shorthand() {
        let now = Utc::now();
        let parsed = parse_bid_deadline("24h", now).unwrap();
        assert_eq!(parsed.timestamp(), (now + chrono::Duration::hours(24)).timestamp());
        let parsed = parse_bid_deadline("7d", now).unwrap();
        assert_eq!(parsed.timestamp(), (now + chrono::Duration::days(7)).timestamp());
        let parsed = parse_bid_deadline("30m", now).unwrap();
        assert_eq!(parsed.timestamp(), (now + chrono::Duration::minutes(30)).timestamp());
    }

    #[test]
    fn bid_deadline_rejects_past_instant() {
        let now = Utc::now();
        let past = now - chrono::Duration::hours(1);
        assert!(parse_bid_deadline(&past.to_rfc3339(), now).is_err());
    }

    #[test]
    fn bid_deadline_rejects_garbage() {
        let now = Utc::now();
        assert!(parse_bid_deadline("not-a-deadline", now).is_err());
    }

    #[test]
    fn terminal_rfp_statuses() {
        assert!(RfpStatus::Awarded.is_terminal());
        assert!(RfpStatus::Expired.is_terminal());
        assert!(RfpStatus::Cancelled.is_terminal());
        assert!(!RfpStatus::Open.is_terminal());
        assert!(!RfpStatus::Selecting.is_terminal());
    }
}
