use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::domain::{Category, DateKey, DateRange, Session};
use crate::error::ArchiveError;
use crate::store::Archive;
use crate::whoop::WhoopClient;

/// Result of persisting one category for one date.
///
/// `written` counts heart-rate samples, sleep events, cycle records or
/// workouts depending on the category. `error` is set when the fetch (or the
/// single per-date write) failed, which separates an empty day from a failed
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub category: Category,
    pub date: DateKey,
    pub written: usize,
    pub skipped: Vec<String>,
    pub error: Option<String>,
}

impl PersistOutcome {
    fn new(category: Category, date: DateKey) -> Self {
        Self {
            category,
            date,
            written: 0,
            skipped: Vec::new(),
            error: None,
        }
    }

    fn fail(mut self, err: ArchiveError) -> Self {
        error!(category = %self.category, date = %self.date, error = %err, "persist failed");
        self.error = Some(err.to_string());
        self
    }

    fn skip(&mut self, reason: String) {
        warn!(category = %self.category, date = %self.date, reason = %reason, "skipping record");
        self.skipped.push(reason);
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcomes of all four categories for one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub date: DateKey,
    pub heart_rate: PersistOutcome,
    pub sleep: PersistOutcome,
    pub cycle: PersistOutcome,
    pub activity: PersistOutcome,
}

impl DaySummary {
    pub fn outcomes(&self) -> [&PersistOutcome; 4] {
        [&self.heart_rate, &self.sleep, &self.cycle, &self.activity]
    }

    pub fn total(&self) -> usize {
        self.outcomes().iter().map(|outcome| outcome.written).sum()
    }

    pub fn has_fetch_error(&self) -> bool {
        self.outcomes().iter().any(|outcome| outcome.is_failed())
    }

    pub fn message(&self) -> String {
        format!(
            "{} HR points, {} sleep events, {} cycles, {} activities",
            self.heart_rate.written, self.sleep.written, self.cycle.written, self.activity.written
        )
    }
}

/// Fetches one category for one date and writes it into the archive.
/// None of the operations return an error; failures are reported in the
/// outcome so one category never blocks the others.
pub struct Persister<C: WhoopClient> {
    archive: Archive,
    client: C,
    heart_rate_step_secs: u32,
}

impl<C: WhoopClient> Persister<C> {
    pub fn new(archive: Archive, client: C, heart_rate_step_secs: u32) -> Self {
        Self {
            archive,
            client,
            heart_rate_step_secs,
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn persist_day(&self, session: &Session, date: DateKey) -> DaySummary {
        let summary = DaySummary {
            date,
            heart_rate: self.persist_heart_rate(session, date),
            sleep: self.persist_sleep(session, date),
            cycle: self.persist_cycle(session, date),
            activity: self.persist_activity(session, date),
        };
        info!(date = %date, summary = %summary.message(), "processed date");
        summary
    }

    pub fn persist_heart_rate(&self, session: &Session, date: DateKey) -> PersistOutcome {
        let outcome = PersistOutcome::new(Category::HeartRate, date);
        let samples = match self.client.fetch_heart_rate(
            session,
            DateRange::single(date),
            self.heart_rate_step_secs,
        ) {
            Ok(samples) => samples,
            Err(err) => return outcome.fail(err),
        };
        // An empty day is left unwritten so gap detection picks it up again.
        // Days that are genuinely empty are therefore re-fetched on every run
        // until they age out of the lookback window.
        if samples.is_empty() {
            info!(date = %date, "no heart rate samples returned");
            return outcome;
        }
        let path = self.archive.heart_rate_path(date);
        if let Err(err) = Archive::write_json_atomic(&path, &samples) {
            return outcome.fail(err);
        }
        info!(date = %date, samples = samples.len(), path = %path, "saved heart rate");
        PersistOutcome {
            written: samples.len(),
            ..outcome
        }
    }

    pub fn persist_sleep(&self, session: &Session, date: DateKey) -> PersistOutcome {
        let mut outcome = PersistOutcome::new(Category::Sleep, date);
        let events = match self.client.fetch_sleep(session, DateRange::single(date)) {
            Ok(events) => events,
            Err(err) => return outcome.fail(err),
        };
        for (index, event) in events.iter().enumerate() {
            let Some(activity_id) = sleep_activity_id(event) else {
                outcome.skip(format!("sleep event #{index} has no activity id"));
                continue;
            };
            // A sleep spanning midnight is returned for both days; naming it by
            // its own start date keeps it to one file.
            let file_date = sleep_start_date(event).unwrap_or(date);
            let path = self.archive.sleep_path(file_date, &activity_id);
            match Archive::write_json_atomic(&path, event) {
                Ok(()) => {
                    info!(date = %date, path = %path, "saved sleep event");
                    outcome.written += 1;
                }
                Err(err) => outcome.skip(format!("sleep event {activity_id}: {err}")),
            }
        }
        outcome
    }

    pub fn persist_cycle(&self, session: &Session, date: DateKey) -> PersistOutcome {
        let outcome = PersistOutcome::new(Category::Cycle, date);
        let cycles = match self.client.fetch_cycles(session, DateRange::single(date)) {
            Ok(cycles) => cycles,
            Err(err) => return outcome.fail(err),
        };
        // Not written either; an empty day costs one cycle fetch per run.
        if cycles.is_empty() {
            info!(date = %date, "no cycle returned");
            return outcome;
        }
        let path = self.archive.cycle_path(date);
        if let Err(err) = Archive::write_json_atomic(&path, &cycles) {
            return outcome.fail(err);
        }
        info!(date = %date, cycles = cycles.len(), path = %path, "saved cycles");
        PersistOutcome {
            written: cycles.len(),
            ..outcome
        }
    }

    /// Workouts are read out of a fresh cycle fetch; nothing is shared with
    /// [`Persister::persist_cycle`].
    pub fn persist_activity(&self, session: &Session, date: DateKey) -> PersistOutcome {
        let mut outcome = PersistOutcome::new(Category::Activity, date);
        let cycles = match self.client.fetch_cycles(session, DateRange::single(date)) {
            Ok(cycles) => cycles,
            Err(err) => return outcome.fail(err),
        };
        let workouts = cycles.iter().flat_map(cycle_workouts);
        for (index, workout) in workouts.enumerate() {
            let sport = workout
                .get("sport_id")
                .and_then(scalar_to_string)
                .unwrap_or_else(|| "unknown".to_string());
            let discriminator = activity_discriminator(workout, date, index);
            let path = self.archive.activity_path(date, &sport, &discriminator);
            match Archive::write_json_atomic(&path, workout) {
                Ok(()) => {
                    info!(date = %date, path = %path, "saved activity");
                    outcome.written += 1;
                }
                Err(err) => outcome.skip(format!("workout #{index}: {err}")),
            }
        }
        outcome
    }
}

fn sleep_activity_id(event: &Value) -> Option<String> {
    event
        .get("activity_id")
        .and_then(scalar_to_string)
        .or_else(|| event.get("id").and_then(scalar_to_string))
        .map(|id| safe_component(&id))
}

/// Calendar date of the event's `start`, as written in its own offset.
fn sleep_start_date(event: &Value) -> Option<DateKey> {
    let start = event.get("start").and_then(Value::as_str)?;
    let start = DateTime::parse_from_rfc3339(start).ok()?;
    Some(DateKey::new(start.date_naive()))
}

fn cycle_workouts(cycle: &Value) -> impl Iterator<Item = &Value> {
    cycle
        .pointer("/strain/workouts")
        .or_else(|| cycle.get("workouts"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Filename component identifying a workout within its date: the sanitized
/// start timestamp, else the workout id, else its position in the day.
pub fn activity_discriminator(workout: &Value, date: DateKey, index: usize) -> String {
    if let Some(start) = workout_start(workout) {
        return sanitize_timestamp(&start);
    }
    if let Some(id) = workout.get("id").and_then(scalar_to_string) {
        return format!("id{}", safe_component(&id));
    }
    format!("{date}_{index}")
}

/// Start of a workout from `start`, or the lower bound of a `during` range
/// such as `['2025-04-24T10:00:00.000Z','2025-04-24T11:00:00.000Z')`.
fn workout_start(workout: &Value) -> Option<String> {
    let raw = match workout.get("start").and_then(Value::as_str) {
        Some(start) => start.to_string(),
        None => {
            let during = workout.get("during").and_then(Value::as_str)?;
            let lower = during.trim_start_matches(['[', '(']).split(',').next()?;
            lower.trim().trim_matches(['\'', '"']).to_string()
        }
    };
    DateTime::parse_from_rfc3339(&raw).ok().map(|_| raw)
}

pub fn sanitize_timestamp(value: &str) -> String {
    value
        .chars()
        .filter_map(|ch| match ch {
            ':' | '.' => Some('-'),
            'T' => Some('_'),
            'Z' => None,
            other => Some(other),
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn safe_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}
