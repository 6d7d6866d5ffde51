use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bilee_core::{Amount, CustomerId, DomainError, DomainResult, Entity, MerchantId, ReceiptId, SessionId};
use bilee_sessions::{BillingSession, LineItem, PaymentStatus};

use crate::merchant::{MerchantCategory, MerchantProfile};

/// The durable, customer-facing record of a settled session.
///
/// At most one receipt exists per `session_id`; the store enforces that on
/// insert. After creation the only field ever written is `customer_id`, by
/// the one-off backfill (which also stamps `migrated_at`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_id: ReceiptId,
    pub session_id: SessionId,
    pub merchant_id: MerchantId,
    pub merchant_name: String,
    pub merchant_logo: Option<String>,
    pub merchant_address: Option<String>,
    pub merchant_phone: Option<String>,
    pub merchant_tax_id: Option<String>,
    pub merchant_category: MerchantCategory,
    /// Scanning customer; `None` for walk-ins.
    pub customer_id: Option<CustomerId>,
    pub items: Vec<LineItem>,
    pub subtotal: Amount,
    pub tax: Amount,
    pub total: Amount,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_time: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
}

impl Entity for Receipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.receipt_id
    }
}

impl Receipt {
    /// Build the receipt for a settled session.
    ///
    /// A missing profile degrades every merchant field to its default.
    pub fn issue(
        receipt_id: ReceiptId,
        session: &BillingSession,
        profile: Option<&MerchantProfile>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !session.is_settled() {
            return Err(DomainError::invariant(format!(
                "session {} is not settled",
                session.id
            )));
        }

        let fallback = MerchantProfile::default();
        let profile = profile.unwrap_or(&fallback);

        Ok(Self {
            receipt_id,
            session_id: session.id.clone(),
            merchant_id: session.merchant_id.clone(),
            merchant_name: profile.display_name().to_string(),
            merchant_logo: profile.logo_url.clone(),
            merchant_address: profile.address.clone(),
            merchant_phone: profile.phone.clone(),
            merchant_tax_id: profile.tax_id.clone(),
            merchant_category: profile.category(),
            customer_id: session.primary_customer().cloned(),
            items: session.items.clone(),
            subtotal: session.subtotal,
            tax: session.tax,
            total: session.total,
            payment_method: session.payment_method.clone(),
            transaction_id: session.transaction_id.clone(),
            payment_time: session.payment_time.unwrap_or(now),
            payment_status: session.payment_status,
            is_verified: session.payment_confirmed,
            created_at: now,
            migrated_at: None,
        })
    }

    /// Set the customer on a receipt issued before customer linking existed.
    pub fn backfill_customer(&mut self, customer_id: CustomerId, now: DateTime<Utc>) -> DomainResult<()> {
        if let Some(existing) = &self.customer_id {
            return Err(DomainError::conflict(format!(
                "receipt {} already has customer {existing}",
                self.receipt_id
            )));
        }
        self.customer_id = Some(customer_id);
        self.migrated_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bilee_sessions::{NewSession, SessionStatus};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn settled_session(customers: Vec<&str>) -> BillingSession {
        let now = Utc::now();
        BillingSession::open(
            NewSession {
                id: SessionId::new("sess_1").unwrap(),
                merchant_id: MerchantId::new("m_1").unwrap(),
                status: SessionStatus::Paid,
                payment_status: PaymentStatus::Paid,
                items: vec![LineItem {
                    name: "Tea".to_string(),
                    qty: 1,
                    unit_price: dec!(5),
                    line_total: dec!(5),
                }],
                subtotal: dec!(5),
                tax: dec!(0.25),
                total: dec!(5.25),
                payment_method: Some("cash".to_string()),
                transaction_id: None,
                connected_customers: customers
                    .into_iter()
                    .map(|c| CustomerId::new(c).unwrap())
                    .collect(),
                expires_at: now + Duration::minutes(10),
            },
            now,
        )
        .unwrap()
    }

    #[test]
    fn receipt_copies_session_amounts_and_first_customer() {
        let session = settled_session(vec!["cust_a", "cust_b"]);
        let receipt = Receipt::issue(ReceiptId::generate(), &session, None, Utc::now()).unwrap();

        assert_eq!(receipt.session_id, session.id);
        assert_eq!(receipt.total, dec!(5.25));
        assert_eq!(receipt.items, session.items);
        assert_eq!(receipt.customer_id.as_ref().map(|c| c.as_str()), Some("cust_a"));
        assert_eq!(receipt.payment_status, PaymentStatus::Paid);
        assert!(receipt.is_verified);
    }

    #[test]
    fn walk_in_receipt_has_no_customer() {
        let session = settled_session(vec![]);
        let receipt = Receipt::issue(ReceiptId::generate(), &session, None, Utc::now()).unwrap();
        assert!(receipt.customer_id.is_none());
    }

    #[test]
    fn missing_profile_degrades_to_defaults() {
        let session = settled_session(vec![]);
        let receipt = Receipt::issue(ReceiptId::generate(), &session, None, Utc::now()).unwrap();
        assert_eq!(receipt.merchant_name, "MY BUSINESS");
        assert_eq!(receipt.merchant_category, MerchantCategory::Other);
        assert!(receipt.merchant_logo.is_none());
        assert!(receipt.merchant_tax_id.is_none());
    }

    #[test]
    fn profile_fields_and_normalized_category_are_used() {
        let profile = MerchantProfile {
            business_name: Some("Corner Store".to_string()),
            address: Some("1 Main St".to_string()),
            category: Some("groceries".to_string()),
            ..MerchantProfile::default()
        };
        let session = settled_session(vec![]);
        let receipt = Receipt::issue(ReceiptId::generate(), &session, Some(&profile), Utc::now()).unwrap();
        assert_eq!(receipt.merchant_name, "Corner Store");
        assert_eq!(receipt.merchant_address.as_deref(), Some("1 Main St"));
        assert_eq!(receipt.merchant_category, MerchantCategory::Grocery);
    }

    #[test]
    fn unsettled_session_cannot_be_receipted() {
        let mut session = settled_session(vec![]);
        session.payment_status = PaymentStatus::Pending;
        let err = Receipt::issue(ReceiptId::generate(), &session, None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn customer_backfill_happens_once() {
        let session = settled_session(vec![]);
        let mut receipt = Receipt::issue(ReceiptId::generate(), &session, None, Utc::now()).unwrap();
        receipt
            .backfill_customer(CustomerId::new("cust_a").unwrap(), Utc::now())
            .unwrap();
        assert!(receipt.migrated_at.is_some());
        assert!(receipt
            .backfill_customer(CustomerId::new("cust_b").unwrap(), Utc::now())
            .is_err());
    }
}
