//! Facts derived once per original stream during calculation.

use chrono::{DateTime, Utc};

use chunklog_core::{
    traits::IndexReaderForCalculator, CalculationStatus, DiscardPoint, OriginalStreamData,
    Result, ScavengePoint, StreamHandle, Timestamp,
};

#[derive(Debug, Clone)]
pub struct StreamCalculator {
    handle: StreamHandle,
    data: OriginalStreamData,
    last_event_number: Option<i64>,
    cutoff_time: Option<Timestamp>,
    truncate_before_or_max_count: DiscardPoint,
}

impl StreamCalculator {
    /// Load the last event number of `handle` and derive the stream's bounds.
    pub async fn load<R>(
        index: &R,
        handle: StreamHandle,
        data: OriginalStreamData,
        scavenge_point: &ScavengePoint,
    ) -> Result<Self>
    where
        R: IndexReaderForCalculator + ?Sized,
    {
        let last_event_number = index.last_event_number(&handle, scavenge_point).await?;
        Ok(Self::new(handle, data, last_event_number, scavenge_point))
    }

    pub fn new(
        handle: StreamHandle,
        data: OriginalStreamData,
        last_event_number: Option<i64>,
        scavenge_point: &ScavengePoint,
    ) -> Self {
        let cutoff_time = data
            .max_age
            .map(|max_age| max_age_cutoff(scavenge_point.effective_now, max_age));

        let truncate_before = data
            .truncate_before
            .map(DiscardPoint::discard_before)
            .unwrap_or(DiscardPoint::KEEP_ALL);

        let max_count = match (data.max_count, last_event_number) {
            (Some(max_count), Some(last)) => {
                DiscardPoint::discard_before(last.saturating_sub(max_count).saturating_add(1))
            }
            _ => DiscardPoint::KEEP_ALL,
        };

        Self {
            handle,
            data,
            last_event_number,
            cutoff_time,
            truncate_before_or_max_count: truncate_before.or(max_count),
        }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn data(&self) -> &OriginalStreamData {
        &self.data
    }

    pub fn is_tombstoned(&self) -> bool {
        self.data.is_tombstoned
    }

    pub fn last_event_number(&self) -> Option<i64> {
        self.last_event_number
    }

    /// Events strictly older than this are past their max age.
    pub fn cutoff_time(&self) -> Option<Timestamp> {
        self.cutoff_time
    }

    pub fn truncate_before_or_max_count(&self) -> DiscardPoint {
        self.truncate_before_or_max_count
    }

    /// Status the stream moves to once calculated.
    pub fn calculation_status(&self) -> CalculationStatus {
        if self.data.is_tombstoned {
            CalculationStatus::Archived
        } else if !self.data.has_retention_policy() {
            CalculationStatus::Spent
        } else {
            CalculationStatus::Active
        }
    }
}

pub(crate) fn max_age_cutoff(effective_now: Timestamp, max_age: std::time::Duration) -> Timestamp {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| effective_now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
