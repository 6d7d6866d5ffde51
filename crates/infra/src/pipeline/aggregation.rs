use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use tracing::{info, instrument};

use bilee_core::MerchantId;
use bilee_reporting::{DailyAggregate, DayWindow, summarize};
use bilee_sessions::SessionStatus;

use crate::error::PipelineError;
use crate::store::{AggregateStore, SessionQuery, SessionStore};

/// Recomputes per-merchant daily revenue aggregates from completed sessions.
pub struct AggregationEngine {
    sessions: Arc<dyn SessionStore>,
    aggregates: Arc<dyn AggregateStore>,
    offset: FixedOffset,
}

impl AggregationEngine {
    pub fn new(sessions: Arc<dyn SessionStore>, aggregates: Arc<dyn AggregateStore>, offset: FixedOffset) -> Self {
        Self {
            sessions,
            aggregates,
            offset,
        }
    }

    /// Rebuild the aggregate for `(merchant_id, date)` from scratch and store
    /// it, replacing any previous value. A day with no completed sessions
    /// stores a zero aggregate so that stale values are cleared.
    #[instrument(skip(self), fields(merchant_id = %merchant_id, date = %date), err)]
    pub async fn recompute(&self, merchant_id: &MerchantId, date: NaiveDate) -> Result<DailyAggregate, PipelineError> {
        let window = DayWindow::new(date, self.offset)?;
        let query = SessionQuery::new()
            .merchant(merchant_id.clone())
            .status(SessionStatus::Completed)
            .completed_between(window.start, window.end);
        let sessions = self.sessions.query(&query).await?;

        let aggregate = summarize(merchant_id, &window, &sessions)?;
        self.aggregates.put(&aggregate).await?;

        info!(
            orders = aggregate.orders_count,
            total = %aggregate.total,
            "daily aggregate recomputed"
        );
        Ok(aggregate)
    }

    pub async fn get(&self, merchant_id: &MerchantId, date: NaiveDate) -> Result<Option<DailyAggregate>, PipelineError> {
        Ok(self.aggregates.get(merchant_id, date).await?)
    }
}
