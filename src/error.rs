//! Error types and HTTP error-response mapping.
//!
//! `NegotiationError` is the single error type returned by every Service
//! entry point. It carries an `ErrorCode` that maps deterministically to an
//! HTTP status and a stable wire code (§6), and serialises to exactly
//! `{"error": "<code>", "message": "<human>"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;

/// Error kinds named per the external-interface error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    RfpNotFound,
    BidNotFound,
    TemplateNotFound,
    InvalidStatus,
    BidDeadlinePast,
    SelfBid,
    DuplicateBid,
    BudgetOutOfRange,
    LowReputation,
    BondRequired,
    InsufficientBond,
    MaxCounterRounds,
    Unauthorized,
    AlreadyAwarded,
    WithdrawalBlocked,
    BidAlreadyWithdrawn,
    NoBids,
    TooManyWinners,
    Validation,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// Stable wire code, used in the `{"error": "<code>", ...}` response.
    pub const fn wire_code(&self) -> &'static str {
        match self {
            ErrorCode::RfpNotFound => "rfp_not_found",
            ErrorCode::BidNotFound => "bid_not_found",
            ErrorCode::TemplateNotFound => "template_not_found",
            ErrorCode::InvalidStatus => "invalid_status",
            ErrorCode::BidDeadlinePast => "deadline_past",
            ErrorCode::SelfBid => "self_bid",
            ErrorCode::DuplicateBid => "duplicate_bid",
            ErrorCode::BudgetOutOfRange => "budget_out_of_range",
            ErrorCode::LowReputation => "low_reputation",
            ErrorCode::BondRequired => "bond_required",
            ErrorCode::InsufficientBond => "insufficient_bond",
            ErrorCode::MaxCounterRounds => "max_rounds",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::AlreadyAwarded => "already_awarded",
            ErrorCode::WithdrawalBlocked => "withdrawal_blocked",
            ErrorCode::BidAlreadyWithdrawn => "already_withdrawn",
            ErrorCode::NoBids => "no_bids",
            ErrorCode::TooManyWinners => "too_many_winners",
            ErrorCode::Validation => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal_error",
        }
    }

    pub const fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::RfpNotFound
            | ErrorCode::BidNotFound
            | ErrorCode::TemplateNotFound
            | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidStatus
            | ErrorCode::DuplicateBid
            | ErrorCode::MaxCounterRounds
            | ErrorCode::AlreadyAwarded
            | ErrorCode::WithdrawalBlocked
            | ErrorCode::BidAlreadyWithdrawn
            | ErrorCode::BidDeadlinePast
            | ErrorCode::NoBids
            | ErrorCode::TooManyWinners => StatusCode::CONFLICT,
            ErrorCode::SelfBid | ErrorCode::BudgetOutOfRange | ErrorCode::BondRequired => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::LowReputation | ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::InsufficientBond => StatusCode::PAYMENT_REQUIRED,
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_server_error(&self) -> bool {
        self.http_status().is_server_error()
    }
}

/// The error type returned by every Service and Store operation.
#[derive(Debug)]
pub struct NegotiationError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    pub internal_message: Option<String>,
}

impl NegotiationError {
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let err = Self {
            code,
            message: message.into(),
            internal_message: None,
        };
        err.log();
        err
    }

    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal: impl Into<String>,
    ) -> Self {
        let err = Self {
            code,
            message: message.into(),
            internal_message: Some(internal.into()),
        };
        err.log();
        err
    }

    pub fn not_found(entity_type: &str, id: impl std::fmt::Display) -> Self {
        let code = match entity_type {
            "RFP" => ErrorCode::RfpNotFound,
            "Bid" => ErrorCode::BidNotFound,
            "Template" => ErrorCode::TemplateNotFound,
            _ => ErrorCode::NotFound,
        };
        Self::new(code, format!("{} {} not found", entity_type, id))
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn internal(context: &str, source: impl std::fmt::Display) -> Self {
        Self::with_internal(
            ErrorCode::Internal,
            "an internal error occurred",
            format!("{}: {}", context, source),
        )
    }

    fn log(&self) {
        if self.code.is_server_error() {
            tracing::error!(
                code = self.code.wire_code(),
                message = %self.message,
                internal = ?self.internal_message,
                "negotiation error"
            );
        } else {
            tracing::warn!(
                code = self.code.wire_code(),
                message = %self.message,
                "negotiation error"
            );
        }
    }
}

impl std::fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.wire_code(), self.message)
    }
}

impl std::error::Error for NegotiationError {}

impl PartialEq for NegotiationError {
    /// Guard-check failures are compared by code alone, for exact-identity
    /// assertions in callers and tests (§7).
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for NegotiationError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        let message = if status.is_server_error() {
            self.internal_message
                .clone()
                .unwrap_or_else(|| self.message.to_string())
        } else {
            self.message.to_string()
        };
        let body = ErrorResponse {
            error: self.code.wire_code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for NegotiationError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => {
                Self::new(ErrorCode::NotFound, "the requested record was not found")
            }
            sqlx::Error::Database(db_err) => {
                let is_unique = db_err
                    .constraint()
                    .map(|c| c.contains("pkey") || c.contains("unique"))
                    .unwrap_or(false);
                if is_unique {
                    Self::with_internal(
                        ErrorCode::Internal,
                        "a record with this identity already exists",
                        db_err.to_string(),
                    )
                } else {
                    Self::with_internal(
                        ErrorCode::Internal,
                        "a database error occurred",
                        db_err.to_string(),
                    )
                }
            }
            other => Self::with_internal(
                ErrorCode::Internal,
                "a database error occurred",
                other.to_string(),
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, NegotiationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_external_interface_table() {
        assert_eq!(ErrorCode::RfpNotFound.wire_code(), "rfp_not_found");
        assert_eq!(ErrorCode::InvalidStatus.wire_code(), "invalid_status");
        assert_eq!(ErrorCode::InsufficientBond.wire_code(), "insufficient_bond");
        assert_eq!(ErrorCode::MaxCounterRounds.wire_code(), "max_rounds");
        assert_eq!(ErrorCode::AlreadyAwarded.wire_code(), "already_awarded");
    }

    #[test]
    fn http_statuses_match_external_interface_table() {
        assert_eq!(ErrorCode::RfpNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::SelfBid.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::InsufficientBond.http_status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ErrorCode::LowReputation.http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ErrorCode::InvalidStatus.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn errors_compare_by_code_for_identity_assertions() {
        let a = NegotiationError::new(ErrorCode::AlreadyAwarded, "x");
        let b = NegotiationError::new(ErrorCode::AlreadyAwarded, "y");
        assert_eq!(a, b);
        let c = NegotiationError::new(ErrorCode::WithdrawalBlocked, "z");
        assert_ne!(a, c);
    }
}
