use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bilee_core::{CustomerId, DomainError, MerchantId, SessionId};
use bilee_infra::pipeline::{PspStatus, VerifiedPayment};
use bilee_sessions::{LineItem, NewSession, PaymentStatus, SessionStatus};

use crate::app::errors;

/// Lifetime of a session when the client does not send `expiresAt`.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 15;

// -------------------------
// Request DTOs
// -------------------------

/// Session document as written by the merchant app.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub id: String,
    pub merchant_id: String,
    pub status: Option<SessionStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub total: Decimal,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub connected_customers: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateSessionRequest {
    pub fn into_new_session(self, now: DateTime<Utc>) -> Result<NewSession, DomainError> {
        let connected_customers = self
            .connected_customers
            .into_iter()
            .map(CustomerId::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NewSession {
            id: SessionId::new(self.id)?,
            merchant_id: MerchantId::new(self.merchant_id)?,
            status: self.status.unwrap_or(SessionStatus::Active),
            payment_status: self.payment_status.unwrap_or(PaymentStatus::Pending),
            items: self.items,
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total,
            payment_method: self.payment_method,
            transaction_id: self.transaction_id,
            connected_customers,
            expires_at: self
                .expires_at
                .unwrap_or(now + Duration::minutes(DEFAULT_SESSION_TTL_MINUTES)),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_method: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptLookup {
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchParams {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub success: bool,
    pub session_id: String,
    pub transaction_id: String,
    pub status: PspStatus,
}

impl From<VerifiedPayment> for WebhookAccepted {
    fn from(payment: VerifiedPayment) -> Self {
        Self {
            success: true,
            session_id: payment.session_id.into_inner(),
            transaction_id: payment.transaction_id,
            status: payment.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepResult {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SweepTriggered {
    pub job: &'static str,
    /// `queued`, or `coalesced` when a run was already pending.
    pub status: &'static str,
}

// -------------------------
// Path parsing helpers
// -------------------------

pub fn parse_session_id(raw: String) -> Result<SessionId, axum::response::Response> {
    SessionId::new(raw).map_err(|e| errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_merchant_id(raw: String) -> Result<MerchantId, axum::response::Response> {
    MerchantId::new(raw).map_err(|e| errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, axum::response::Response> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_date",
            format!("expected YYYY-MM-DD, got {raw:?}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_defaults_to_active_pending_session() {
        let req: CreateSessionRequest = serde_json::from_value(json!({
            "id": "sess_1",
            "merchantId": "m1",
            "items": [{"name": "Tea", "qty": 1, "unitPrice": "10", "total": "10"}],
            "subtotal": "10",
            "total": "10",
        }))
        .unwrap();
        let now = Utc::now();
        let new = req.into_new_session(now).unwrap();
        assert_eq!(new.status, SessionStatus::Active);
        assert_eq!(new.payment_status, PaymentStatus::Pending);
        assert_eq!(new.expires_at, now + Duration::minutes(DEFAULT_SESSION_TTL_MINUTES));
        assert_eq!(new.items[0].line_total, Decimal::from(10));
    }

    #[test]
    fn blank_customer_id_is_rejected() {
        let req: CreateSessionRequest = serde_json::from_value(json!({
            "id": "sess_1",
            "merchantId": "m1",
            "subtotal": 1,
            "total": 1,
            "connectedCustomers": [" "],
        }))
        .unwrap();
        assert!(req.into_new_session(Utc::now()).is_err());
    }
}
