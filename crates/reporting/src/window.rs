use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use bilee_core::{DomainError, DomainResult};

/// A merchant-local calendar day as a half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn new(date: NaiveDate, offset: FixedOffset) -> DomainResult<Self> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let start = offset
            .from_local_datetime(&local_midnight)
            .single()
            .ok_or_else(|| DomainError::validation(format!("no local midnight for {date}")))?
            .with_timezone(&Utc);
        Ok(Self {
            date,
            start,
            end: start + Duration::days(1),
        })
    }

    /// Parse a `YYYY-MM-DD` date.
    pub fn parse(date: &str, offset: FixedOffset) -> DomainResult<Self> {
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|e| DomainError::validation(format!("invalid date {date:?}: {e}")))?;
        Self::new(date, offset)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}
