//! PSP payment webhook verification and reconciliation.
//!
//! This is the only place untrusted external input enters the pipeline, so
//! every check fails closed: anything missing, malformed or ambiguous is
//! rejected and never defaulted to a successful payment.

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, instrument, warn};

use bilee_core::{Amount, SessionId, amount_from_json, to_currency_precision, within_tolerance};
use bilee_sessions::{PaymentStatus, SessionPatch};

use crate::error::{ErrorKind, StoreError};
use crate::store::SessionStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the PSP signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Pluggable PSP signing scheme.
pub trait SignatureScheme: Send + Sync {
    fn name(&self) -> &'static str;

    /// `true` only if `signature` is a valid signature of exactly `body`.
    fn verify(&self, body: &[u8], signature: &str) -> bool;
}

/// HMAC-SHA256 over the raw body, hex encoded, optionally prefixed `sha256=`.
#[derive(Clone)]
pub struct HmacSha256Scheme {
    key: Vec<u8>,
}

impl HmacSha256Scheme {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// Hex signature of `body`, as a PSP would send it.
    pub fn sign(&self, body: &[u8]) -> String {
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mut mac) => {
                mac.update(body);
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }
}

impl core::fmt::Debug for HmacSha256Scheme {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HmacSha256Scheme").finish_non_exhaustive()
    }
}

impl SignatureScheme for HmacSha256Scheme {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn verify(&self, body: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(body);
        // Constant-time comparison.
        mac.verify_slice(&expected).is_ok()
    }
}

/// Payment result reported by the PSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PspStatus {
    Success,
    Failed,
}

impl PspStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "SUCCESS" => Some(PspStatus::Success),
            "FAILED" => Some(PspStatus::Failed),
            _ => None,
        }
    }

    pub fn payment_status(self) -> PaymentStatus {
        match self {
            PspStatus::Success => PaymentStatus::Paid,
            PspStatus::Failed => PaymentStatus::Failed,
        }
    }
}

/// A webhook that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub session_id: SessionId,
    pub transaction_id: String,
    pub status: PspStatus,
    pub amount: Amount,
    /// `false` when the session already carried this exact settlement and
    /// nothing was written.
    pub applied: bool,
}

/// Why a webhook was refused.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("signature header missing")]
    MissingSignature,

    #[error("signature does not match payload")]
    InvalidSignature,

    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("unsupported payment status {0:?}")]
    InvalidStatus(String),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("amount {received} does not match session total {expected}")]
    AmountMismatch { expected: Amount, received: Amount },

    #[error("session {0} is already settled")]
    AlreadySettled(SessionId),

    #[error(transparent)]
    Persistence(StoreError),
}

impl WebhookRejection {
    /// Stable reason code for responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookRejection::MissingSignature => "missing_signature",
            WebhookRejection::InvalidSignature => "invalid_signature",
            WebhookRejection::MalformedPayload(_) => "malformed_payload",
            WebhookRejection::MissingFields(_) => "missing_fields",
            WebhookRejection::InvalidStatus(_) => "invalid_status",
            WebhookRejection::SessionNotFound(_) => "session_not_found",
            WebhookRejection::AmountMismatch { .. } => "amount_mismatch",
            WebhookRejection::AlreadySettled(_) => "already_settled",
            WebhookRejection::Persistence(_) => "persistence_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookRejection::MissingSignature | WebhookRejection::InvalidSignature => ErrorKind::Authentication,
            WebhookRejection::MalformedPayload(_)
            | WebhookRejection::MissingFields(_)
            | WebhookRejection::InvalidStatus(_) => ErrorKind::Validation,
            WebhookRejection::SessionNotFound(_) => ErrorKind::NotFound,
            WebhookRejection::AmountMismatch { .. } => ErrorKind::Reconciliation,
            WebhookRejection::AlreadySettled(_) => ErrorKind::Conflict,
            WebhookRejection::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

struct WebhookPayload {
    session_id: SessionId,
    transaction_id: String,
    status: PspStatus,
    amount: Amount,
}

fn required_str<'a>(payload: &'a JsonValue, field: &'static str, missing: &mut Vec<&'static str>) -> Option<&'a str> {
    let value = payload.get(field).and_then(JsonValue::as_str).map(str::trim).filter(|s| !s.is_empty());
    if value.is_none() {
        missing.push(field);
    }
    value
}

fn parse_payload(body: &[u8]) -> Result<WebhookPayload, WebhookRejection> {
    let payload: JsonValue =
        serde_json::from_slice(body).map_err(|e| WebhookRejection::MalformedPayload(e.to_string()))?;
    if !payload.is_object() {
        return Err(WebhookRejection::MalformedPayload("expected a JSON object".to_string()));
    }

    let mut missing = Vec::new();
    let session_id = required_str(&payload, "session_id", &mut missing);
    let transaction_id = required_str(&payload, "transaction_id", &mut missing);
    let status = required_str(&payload, "status", &mut missing);
    let amount = payload.get("amount").filter(|v| !v.is_null());
    if amount.is_none() {
        missing.push("amount");
    }

    let (Some(session_id), Some(transaction_id), Some(status), Some(amount)) =
        (session_id, transaction_id, status, amount)
    else {
        return Err(WebhookRejection::MissingFields(missing));
    };

    let status = PspStatus::parse(status).ok_or_else(|| WebhookRejection::InvalidStatus(status.to_string()))?;
    let amount = amount_from_json(amount)
        .ok_or_else(|| WebhookRejection::MalformedPayload(format!("amount is not a number: {amount}")))?;
    let session_id =
        SessionId::new(session_id).map_err(|e| WebhookRejection::MalformedPayload(e.to_string()))?;

    Ok(WebhookPayload {
        session_id,
        transaction_id: transaction_id.to_string(),
        status,
        amount,
    })
}

/// Verifies PSP webhooks and records the payment on the session.
pub struct WebhookVerifier {
    sessions: Arc<dyn SessionStore>,
    scheme: Arc<dyn SignatureScheme>,
    tolerance: Decimal,
}

impl WebhookVerifier {
    pub fn new(sessions: Arc<dyn SessionStore>, scheme: Arc<dyn SignatureScheme>, tolerance: Decimal) -> Self {
        Self {
            sessions,
            scheme,
            tolerance,
        }
    }

    /// Check a raw webhook request and, if it holds up, record the payment.
    ///
    /// The signature is checked before the body is even parsed, so an
    /// unsigned request never reaches the store.
    #[instrument(skip_all, fields(scheme = self.scheme.name()))]
    pub async fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<VerifiedPayment, WebhookRejection> {
        let result = self.verify_inner(signature, body).await;
        match &result {
            Ok(payment) => info!(
                session_id = %payment.session_id,
                transaction_id = %payment.transaction_id,
                status = ?payment.status,
                applied = payment.applied,
                "webhook accepted"
            ),
            Err(rejection) => warn!(reason = rejection.code(), error = %rejection, "webhook rejected"),
        }
        result
    }

    async fn verify_inner(&self, signature: Option<&str>, body: &[u8]) -> Result<VerifiedPayment, WebhookRejection> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(WebhookRejection::MissingSignature)?;
        if !self.scheme.verify(body, signature) {
            return Err(WebhookRejection::InvalidSignature);
        }

        let payload = parse_payload(body)?;

        let session = self
            .sessions
            .get(&payload.session_id)
            .await
            .map_err(WebhookRejection::Persistence)?
            .ok_or_else(|| WebhookRejection::SessionNotFound(payload.session_id.clone()))?;

        let received = to_currency_precision(payload.amount);
        if !within_tolerance(session.total, received, self.tolerance) {
            return Err(WebhookRejection::AmountMismatch {
                expected: session.total,
                received: payload.amount,
            });
        }

        if session.payment_status == PaymentStatus::Paid {
            let same_transaction = session
                .transaction_id
                .as_deref()
                .is_none_or(|txn| txn == payload.transaction_id);
            if payload.status == PspStatus::Success && same_transaction {
                return Ok(VerifiedPayment {
                    session_id: payload.session_id,
                    transaction_id: payload.transaction_id,
                    status: payload.status,
                    amount: payload.amount,
                    applied: false,
                });
            }
            return Err(WebhookRejection::AlreadySettled(payload.session_id));
        }

        let success = payload.status == PspStatus::Success;
        let patch = SessionPatch::at(Utc::now())
            .payment_status(payload.status.payment_status())
            .payment_confirmed(success)
            .payment_method("upi")
            .transaction_id(payload.transaction_id.clone())
            .payment_time(Utc::now());

        match self.sessions.update(&payload.session_id, &patch).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(WebhookRejection::SessionNotFound(payload.session_id));
            }
            // Settled by a concurrent writer since we read it.
            Err(StoreError::Rejected(err)) if err.is_state_conflict() => {
                return Err(WebhookRejection::AlreadySettled(payload.session_id));
            }
            Err(err) => return Err(WebhookRejection::Persistence(err)),
        }

        Ok(VerifiedPayment {
            session_id: payload.session_id,
            transaction_id: payload.transaction_id,
            status: payload.status,
            amount: payload.amount,
            applied: true,
        })
    }
}
