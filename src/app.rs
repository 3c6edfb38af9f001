use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::{Credentials, DateKey, Session};
use crate::error::ArchiveError;
use crate::gaps::missing_dates;
use crate::notify::{Notifier, notify_best_effort};
use crate::persist::{DaySummary, Persister};
use crate::retry::{BackoffSchedule, Sleeper, ThreadSleeper, run_with_backoff};
use crate::whoop::WhoopClient;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub backoff: BackoffSchedule,
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DailyOutcome {
    Completed { summary: DaySummary },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: DateKey,
    pub daily: DailyOutcome,
    pub backfill: Vec<DaySummary>,
    pub backfill_aborted: Option<String>,
}

impl RunReport {
    pub fn daily_success(&self) -> bool {
        matches!(&self.daily, DailyOutcome::Completed { summary } if summary.total() > 0)
    }

    /// Backfilled dates that produced at least one record.
    pub fn filled_dates(&self) -> Vec<DateKey> {
        self.backfill
            .iter()
            .filter(|summary| summary.total() > 0)
            .map(|summary| summary.date)
            .collect()
    }
}

/// One archiving run: authenticate, fetch yesterday under the backoff
/// schedule, then backfill every missing date in the lookback window with
/// the same session.
pub struct App<C: WhoopClient> {
    persister: Persister<C>,
    credentials: Credentials,
    options: RunOptions,
    notifier: Option<Box<dyn Notifier>>,
    sleeper: Box<dyn Sleeper>,
}

impl<C: WhoopClient> App<C> {
    pub fn new(persister: Persister<C>, credentials: Credentials, options: RunOptions) -> Self {
        Self {
            persister,
            credentials,
            options,
            notifier: None,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn persister(&self) -> &Persister<C> {
        &self.persister
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs the daily fetch for the day before `today` and the backfill.
    ///
    /// Only start-up failures (preparing the archive, authenticating) are
    /// returned as errors; a daily fetch that exhausts its retries is
    /// reported and the backfill still runs.
    pub fn run(&self, today: DateKey) -> Result<RunReport, ArchiveError> {
        if let Err(err) = self.persister.archive().ensure_partitions() {
            error!(error = %err, "failed to prepare archive");
            self.notify(false, &format!("WHOOP archive could not start: {err}"));
            return Err(err);
        }

        let Some(yesterday) = today.pred() else {
            return Err(ArchiveError::InvalidDate(format!("no day before {today}")));
        };
        info!(date = %yesterday, "starting run");

        let mut session = match self.persister.client().authenticate(&self.credentials) {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "authentication failed, aborting run");
                self.notify(false, &format!("WHOOP authentication failed: {err}"));
                return Err(err);
            }
        };
        info!(user_id = session.user_id, "authenticated");

        let daily = self.run_daily(&session, yesterday);
        let (backfill, backfill_aborted) = self.run_backfill(&mut session, today);

        let report = RunReport {
            date: yesterday,
            daily,
            backfill,
            backfill_aborted,
        };
        info!(
            daily_success = report.daily_success(),
            backfill_dates = report.backfill.len(),
            filled = report.filled_dates().len(),
            "run finished"
        );
        Ok(report)
    }

    fn run_daily(&self, session: &Session, date: DateKey) -> DailyOutcome {
        let result = run_with_backoff(&self.options.backoff, self.sleeper.as_ref(), |attempt| {
            info!(date = %date, attempt, "running daily fetch");
            let summary = self.persister.persist_day(session, date);
            // Nothing written and something failed: treat the attempt as an
            // outage rather than an empty day.
            if summary.total() == 0 && summary.has_fetch_error() {
                let reason = summary
                    .outcomes()
                    .iter()
                    .filter_map(|outcome| outcome.error.as_deref())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ArchiveError::DailyTaskFailed {
                    date: date.to_string(),
                    reason,
                });
            }
            Ok(summary)
        });

        match result {
            Ok(summary) => {
                let success = summary.total() > 0;
                self.notify(
                    success,
                    &format!("WHOOP data for {date}: {}", summary.message()),
                );
                DailyOutcome::Completed { summary }
            }
            Err(err) => {
                error!(date = %date, error = %err, "daily fetch exhausted all attempts");
                self.notify(
                    false,
                    &format!(
                        "WHOOP daily fetch failed after {} attempts: {err}",
                        self.options.backoff.max_attempts()
                    ),
                );
                DailyOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn run_backfill(
        &self,
        session: &mut Session,
        today: DateKey,
    ) -> (Vec<DaySummary>, Option<String>) {
        let missing = missing_dates(
            self.persister.archive(),
            today,
            self.options.lookback_days,
        );
        if missing.is_empty() {
            info!("archive complete for lookback window, nothing to backfill");
            return (Vec::new(), None);
        }
        info!(dates = missing.len(), "starting backfill");

        let mut summaries = Vec::with_capacity(missing.len());
        for date in missing {
            if session.is_expired(Utc::now()) {
                warn!(date = %date, "session expired, re-authenticating");
                match self.persister.client().authenticate(&self.credentials) {
                    Ok(fresh) => *session = fresh,
                    Err(err) => {
                        let reason = format!("re-authentication failed before {date}: {err}");
                        error!(reason = %reason, "stopping backfill");
                        self.notify(false, &format!("WHOOP backfill stopped: {reason}"));
                        return (summaries, Some(reason));
                    }
                }
            }
            summaries.push(self.persister.persist_day(session, date));
        }
        (summaries, None)
    }

    fn notify(&self, success: bool, message: &str) {
        notify_best_effort(self.notifier.as_deref(), success, message);
    }
}
