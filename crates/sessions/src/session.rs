use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bilee_core::{Amount, CustomerId, DomainError, DomainResult, Entity, MerchantId, ReceiptId, SessionId, ValueObject};

/// Session lifecycle status.
///
/// Forward order: `ACTIVE → {PAID → COMPLETED | EXPIRED} → ARCHIVED`.
/// `ACTIVE → COMPLETED` is allowed directly for instant walk-in checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Paid,
    Completed,
    Expired,
    Archived,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Active,
        SessionStatus::Paid,
        SessionStatus::Completed,
        SessionStatus::Expired,
        SessionStatus::Archived,
    ];

    /// Position in the forward order. `PAID` and `EXPIRED` are siblings.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Active => 0,
            SessionStatus::Paid | SessionStatus::Expired => 1,
            SessionStatus::Completed => 2,
            SessionStatus::Archived => 3,
        }
    }

    /// Whether a session may move from `self` to `next`. Staying put is allowed.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        self == next
            || matches!(
                (self, next),
                (Active, Paid)
                    | (Active, Completed)
                    | (Active, Expired)
                    | (Paid, Completed)
                    | (Expired, Archived)
                    | (Completed, Archived)
            )
    }

    pub fn ensure_transition(self, next: SessionStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::IllegalTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Paid => "PAID",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Expired => "EXPIRED",
            SessionStatus::Archived => "ARCHIVED",
        }
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status as reported by the PSP or the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

/// One billed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub qty: u32,
    pub unit_price: Amount,
    #[serde(alias = "total")]
    pub line_total: Amount,
}

impl ValueObject for LineItem {}

/// One in-store transaction, from creation to completion or expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSession {
    pub id: SessionId,
    pub merchant_id: MerchantId,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub payment_confirmed: bool,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub subtotal: Amount,
    pub tax: Amount,
    pub total: Amount,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// First entry is the scanning customer; empty for walk-ins.
    #[serde(default)]
    pub connected_customers: Vec<CustomerId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub payment_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub receipt_generated: bool,
    #[serde(default)]
    pub receipt_id: Option<ReceiptId>,
}

impl Entity for BillingSession {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Client-supplied fields for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub id: SessionId,
    pub merchant_id: MerchantId,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<LineItem>,
    pub subtotal: Amount,
    pub tax: Amount,
    pub total: Amount,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub connected_customers: Vec<CustomerId>,
    pub expires_at: DateTime<Utc>,
}

impl BillingSession {
    /// Validate client input and build the initial document.
    ///
    /// A session may be born `PAID` (instant walk-in checkout); it can never be
    /// born completed, expired or archived, nor with a receipt attached.
    pub fn open(new: NewSession, now: DateTime<Utc>) -> DomainResult<Self> {
        if !matches!(new.status, SessionStatus::Active | SessionStatus::Paid) {
            return Err(DomainError::validation(format!(
                "a new session must be ACTIVE or PAID, got {}",
                new.status
            )));
        }
        if new.status == SessionStatus::Paid && new.payment_status != PaymentStatus::Paid {
            return Err(DomainError::validation(
                "status PAID requires paymentStatus PAID",
            ));
        }
        if new.subtotal.is_sign_negative() || new.tax.is_sign_negative() || new.total.is_sign_negative() {
            return Err(DomainError::validation("amounts must not be negative"));
        }
        if new.expires_at <= now {
            return Err(DomainError::validation("expiresAt must be in the future"));
        }
        for item in &new.items {
            if item.name.trim().is_empty() {
                return Err(DomainError::validation("item name must not be empty"));
            }
            if item.line_total.is_sign_negative() || item.unit_price.is_sign_negative() {
                return Err(DomainError::validation("item amounts must not be negative"));
            }
        }

        let paid = new.payment_status == PaymentStatus::Paid;
        Ok(Self {
            id: new.id,
            merchant_id: new.merchant_id,
            status: new.status,
            payment_status: new.payment_status,
            payment_confirmed: paid,
            items: new.items,
            subtotal: new.subtotal,
            tax: new.tax,
            total: new.total,
            payment_method: new.payment_method,
            transaction_id: new.transaction_id,
            connected_customers: new.connected_customers,
            created_at: now,
            expires_at: new.expires_at,
            completed_at: None,
            updated_at: now,
            payment_time: paid.then_some(now),
            receipt_generated: false,
            receipt_id: None,
        })
    }

    pub fn is_settled(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// The scanning customer, if any (walk-ins have none).
    pub fn primary_customer(&self) -> Option<&CustomerId> {
        self.connected_customers.first()
    }

    /// Apply a field-level update, enforcing the document invariants.
    ///
    /// On error the session is left untouched.
    pub fn apply_patch(&mut self, patch: &SessionPatch) -> DomainResult<()> {
        if let Some(next) = patch.status {
            self.status.ensure_transition(next)?;
        }

        let payment_status = patch.payment_status.unwrap_or(self.payment_status);
        if self.payment_status == PaymentStatus::Paid && payment_status != PaymentStatus::Paid {
            return Err(DomainError::invariant("a settled payment cannot be reverted"));
        }

        match patch.receipt_generated {
            Some(false) if self.receipt_generated => {
                return Err(DomainError::invariant("receiptGenerated cannot be cleared"));
            }
            Some(true) if payment_status != PaymentStatus::Paid => {
                return Err(DomainError::invariant(
                    "receiptGenerated requires paymentStatus PAID",
                ));
            }
            _ => {}
        }
        if let (Some(existing), Some(new)) = (&self.receipt_id, &patch.receipt_id) {
            if existing != new {
                return Err(DomainError::conflict(format!(
                    "session already linked to receipt {existing}"
                )));
            }
        }

        if let Some(v) = patch.status {
            self.status = v;
        }
        self.payment_status = payment_status;
        if let Some(v) = patch.payment_confirmed {
            self.payment_confirmed = v;
        }
        if let Some(v) = &patch.payment_method {
            self.payment_method = Some(v.clone());
        }
        if let Some(v) = &patch.transaction_id {
            self.transaction_id = Some(v.clone());
        }
        if let Some(v) = patch.payment_time {
            self.payment_time = Some(v);
        }
        if let Some(v) = patch.completed_at {
            self.completed_at = Some(v);
        }
        if let Some(v) = patch.receipt_generated {
            self.receipt_generated = v;
        }
        if let Some(v) = &patch.receipt_id {
            self.receipt_id = Some(v.clone());
        }
        self.updated_at = patch.updated_at;
        Ok(())
    }
}

/// Field-level session update.
///
/// Only the fields that are set are written; everything else in the stored
/// document is left as-is, so concurrent writers touching different fields do
/// not clobber each other. Serialized form is a partial camelCase document
/// suitable for a JSON merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_confirmed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_generated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<ReceiptId>,
    pub updated_at: DateTime<Utc>,
}

impl SessionPatch {
    /// An empty patch that only stamps `updatedAt`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            payment_status: None,
            payment_confirmed: None,
            payment_method: None,
            transaction_id: None,
            payment_time: None,
            completed_at: None,
            receipt_generated: None,
            receipt_id: None,
            updated_at: now,
        }
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn payment_confirmed(mut self, confirmed: bool) -> Self {
        self.payment_confirmed = Some(confirmed);
        self
    }

    pub fn payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn transaction_id(mut self, txn: impl Into<String>) -> Self {
        self.transaction_id = Some(txn.into());
        self
    }

    pub fn payment_time(mut self, at: DateTime<Utc>) -> Self {
        self.payment_time = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Link the session to its receipt (sets `receiptGenerated` and `receiptId`).
    pub fn receipt(mut self, receipt_id: ReceiptId) -> Self {
        self.receipt_generated = Some(true);
        self.receipt_id = Some(receipt_id);
        self
    }
}
