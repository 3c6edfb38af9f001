use tracing::info;

use crate::domain::{Category, DateKey};
use crate::store::Archive;

/// Dates in `[today - lookback_days, today - 1]` with no heart-rate file,
/// most recent first.
///
/// Heart rate is the completeness signal for every category: a date with a
/// heart-rate file is considered archived. Today is never reported because
/// its data is still accumulating. The window is cut short where it would
/// run past the earliest representable date.
pub fn missing_dates(archive: &Archive, today: DateKey, lookback_days: u32) -> Vec<DateKey> {
    let existing = archive.list_existing_dates(Category::HeartRate);
    let missing: Vec<DateKey> = (1..=lookback_days)
        .map_while(|offset| today.days_before(offset))
        .filter(|date| !existing.contains(date))
        .collect();
    info!(
        lookback_days,
        archived = existing.len(),
        missing = missing.len(),
        "computed backfill window"
    );
    missing
}
