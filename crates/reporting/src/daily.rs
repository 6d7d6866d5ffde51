use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use bilee_core::{Amount, DomainError, DomainResult, MerchantId, ValueObject};
use bilee_sessions::{BillingSession, SessionStatus};

use crate::window::DayWindow;

/// Per-item rollup across a day's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSold {
    pub name: String,
    pub qty: u64,
    pub revenue: Amount,
}

impl ValueObject for ItemSold {}

/// Revenue rollup for one merchant on one local calendar day.
///
/// Keyed by `(merchant_id, date)`; a recompute replaces it entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAggregate {
    pub merchant_id: MerchantId,
    pub date: NaiveDate,
    pub total: Amount,
    pub orders_count: u64,
    /// Sorted by item name.
    pub items_sold: Vec<ItemSold>,
}

impl DailyAggregate {
    pub fn empty(merchant_id: MerchantId, date: NaiveDate) -> Self {
        Self {
            merchant_id,
            date,
            total: Amount::ZERO,
            orders_count: 0,
            items_sold: Vec::new(),
        }
    }
}

/// Roll up the completed sessions of `merchant_id` that fall in `window`.
///
/// Sessions of other merchants, not `COMPLETED`, or completed outside the
/// window are skipped, so callers may pass a superset. Items are merged by
/// exact name. Output does not depend on input order.
///
/// Fails with [`DomainError::AmountOverflow`] when a running sum leaves the
/// `Decimal` range.
pub fn summarize<'a>(
    merchant_id: &MerchantId,
    window: &DayWindow,
    sessions: impl IntoIterator<Item = &'a BillingSession>,
) -> DomainResult<DailyAggregate> {
    let mut aggregate = DailyAggregate::empty(merchant_id.clone(), window.date);
    let mut items: BTreeMap<&str, (u64, Amount)> = BTreeMap::new();

    for session in sessions {
        let in_day = session.completed_at.is_some_and(|at| window.contains(at));
        if &session.merchant_id != merchant_id || session.status != SessionStatus::Completed || !in_day {
            continue;
        }

        aggregate.total = aggregate
            .total
            .checked_add(session.total)
            .ok_or_else(|| DomainError::overflow(format!("daily total for {merchant_id} on {}", window.date)))?;
        aggregate.orders_count += 1;
        for item in &session.items {
            let entry = items.entry(item.name.as_str()).or_insert((0, Amount::ZERO));
            entry.0 += u64::from(item.qty);
            entry.1 = entry
                .1
                .checked_add(item.line_total)
                .ok_or_else(|| DomainError::overflow(format!("revenue of item {:?}", item.name)))?;
        }
    }

    aggregate.items_sold = items
        .into_iter()
        .map(|(name, (qty, revenue))| ItemSold {
            name: name.to_string(),
            qty,
            revenue,
        })
        .collect();
    Ok(aggregate)
}
