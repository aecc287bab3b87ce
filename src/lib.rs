#![allow(clippy::result_large_err)]
//! # Concord
//!
//! An autonomous negotiation engine mediating RFP auctions between buyer
//! and seller agents.
//!
//! ## Architecture
//!
//! - **Service**: PublishRFP/PlaceBid/Counter/SelectWinner(s)/AutoSelect/
//!   CancelRFP/WithdrawBid, guarded by a per-RFP lock table
//! - **Store**: durable CRUD for RFPs, bids, and templates (Postgres or
//!   in-memory backend)
//! - **Ledger**: two-phase bond holds (hold/confirm/release/deposit)
//! - **Sweep**: the periodic driver that advances RFPs past their deadline
//! - **Realtime**: a single-actor websocket fan-out hub
//! - **Observability**: distributed tracing, metrics, and structured event
//!   logging
//! - **API**: the HTTP surface over all of the above

pub mod api;
pub mod config;
pub mod contract_former;
pub mod domain;
pub mod error;
pub mod health;
pub mod ledger;
pub mod locktable;
pub mod observability;
pub mod realtime;
pub mod reputation;
pub mod scorer;
pub mod service;
pub mod store;
pub mod sweep;

pub use error::{ErrorCode, NegotiationError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::contract_former::{ContractFormer, MockContractFormer};
    pub use crate::domain::{
        Bid, BidId, BidStatus, BondStatus, Rfp, RfpId, RfpStatus, ScoringWeights, Template,
        TemplateId,
    };
    pub use crate::error::{ErrorCode, NegotiationError, Result};
    pub use crate::ledger::{InMemoryLedger, Ledger, LedgerError};
    pub use crate::locktable::LockTable;
    pub use crate::realtime::{Event, EventData, EventType, Filter, RealtimeHub};
    pub use crate::reputation::{ReputationOracle, StaticReputationOracle};
    pub use crate::service::{CounterRequest, PlaceBidRequest, PublishRfpRequest, Service};
    pub use crate::store::{InMemoryStore, PostgresStore, Store};
    pub use crate::sweep::{Sweep, SweepConfig};
}
