//! Pure, deterministic bid scoring (§4.2). No I/O.

use crate::domain::{clamp, parse_decimal, Bid, Rfp, ScoringWeights};

/// `(bid, rfp, reputation) -> score in [0, 1]`.
///
/// `priceScore = clamp(1 - totalBudget/maxBudget, 0, 1)`, with `maxBudget=0`
/// forced to a price score of `0` rather than dividing by zero.
pub fn score_bid(bid: &Bid, rfp: &Rfp, reputation: f64) -> f64 {
    let max_budget = parse_decimal(&rfp.max_budget);
    let price_score = if max_budget <= 0.0 {
        0.0
    } else {
        clamp(1.0 - bid.total_budget_f64() / max_budget, 0.0, 1.0)
    };
    let rep_score = clamp(reputation / 100.0, 0.0, 1.0);
    let sla_score = clamp(bid.success_rate / 100.0, 0.0, 1.0);

    weighted_score(&rfp.scoring_weights, price_score, rep_score, sla_score)
}

fn weighted_score(w: &ScoringWeights, price: f64, reputation: f64, sla: f64) -> f64 {
    w.price * price + w.reputation * reputation + w.sla * sla
}
