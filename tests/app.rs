use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use whoop_archive::app::{App, DailyOutcome, RunOptions};
use whoop_archive::config::{Config, ConfigLoader};
use whoop_archive::domain::{Category, Credentials, DateKey, DateRange, Session};
use whoop_archive::error::ArchiveError;
use whoop_archive::notify::{Notifier, notify_startup_failure};
use whoop_archive::persist::Persister;
use whoop_archive::retry::{BackoffSchedule, Sleeper};
use whoop_archive::store::Archive;
use whoop_archive::whoop::WhoopClient;

#[derive(Default)]
struct MockWhoop {
    heart_rate: Vec<Value>,
    sleep: Vec<Value>,
    cycles: Vec<Value>,
    // Fetch calls that fail before the service "recovers".
    outage_calls: Mutex<usize>,
    // Results handed out by successive authenticate calls; the last one repeats.
    auth_results: Mutex<Vec<Result<Session, String>>>,
    auth_calls: Mutex<usize>,
    heart_rate_dates: Mutex<Vec<DateKey>>,
}

impl MockWhoop {
    fn outage(&self) -> Result<(), ArchiveError> {
        let mut remaining = self.outage_calls.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ArchiveError::WhoopHttp("connection refused".to_string()));
        }
        Ok(())
    }
}

impl WhoopClient for MockWhoop {
    fn authenticate(&self, _credentials: &Credentials) -> Result<Session, ArchiveError> {
        *self.auth_calls.lock().unwrap() += 1;
        let mut results = self.auth_results.lock().unwrap();
        let next = if results.len() > 1 {
            results.remove(0)
        } else {
            results.first().cloned().unwrap_or_else(|| Ok(session(None)))
        };
        next.map_err(ArchiveError::Authentication)
    }

    fn fetch_heart_rate(
        &self,
        _session: &Session,
        range: DateRange,
        _step_secs: u32,
    ) -> Result<Vec<Value>, ArchiveError> {
        self.heart_rate_dates.lock().unwrap().push(range.start);
        self.outage()?;
        Ok(self.heart_rate.clone())
    }

    fn fetch_sleep(&self, _session: &Session, _range: DateRange) -> Result<Vec<Value>, ArchiveError> {
        self.outage()?;
        Ok(self.sleep.clone())
    }

    fn fetch_cycles(
        &self,
        _session: &Session,
        _range: DateRange,
    ) -> Result<Vec<Value>, ArchiveError> {
        self.outage()?;
        Ok(self.cycles.clone())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(bool, String)>>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, success: bool, message: &str) -> Result<(), ArchiveError> {
        self.sent.lock().unwrap().push((success, message.to_string()));
        Ok(())
    }
}

struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _success: bool, _message: &str) -> Result<(), ArchiveError> {
        Err(ArchiveError::NotifyStatus {
            status: 401,
            message: "bad token".to_string(),
        })
    }
}

#[derive(Clone, Default)]
struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

fn session(expires_at: Option<chrono::DateTime<Utc>>) -> Session {
    Session {
        access_token: "token".to_string(),
        user_id: 7,
        expires_at,
    }
}

fn key(value: &str) -> DateKey {
    value.parse().unwrap()
}

fn today() -> DateKey {
    key("2025-04-25")
}

fn full_day_mock() -> MockWhoop {
    MockWhoop {
        heart_rate: (0..10)
            .map(|i| json!({ "timestamp": format!("t{i}"), "heart_rate": 55 + i }))
            .collect(),
        sleep: vec![json!({ "activity_id": 1 }), json!({ "activity_id": 2 })],
        cycles: vec![json!({ "id": 3, "strain": { "workouts": [] } })],
        ..MockWhoop::default()
    }
}

struct Harness {
    _temp: tempfile::TempDir,
    app: App<MockWhoop>,
    notifier: RecordingNotifier,
    sleeper: RecordingSleeper,
}

fn harness(mock: MockWhoop, backoff: &[u64], lookback_days: u32) -> Harness {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let persister = Persister::new(Archive::new(root), mock, 6);
    let notifier = RecordingNotifier::default();
    let sleeper = RecordingSleeper::default();
    let app = App::new(
        persister,
        Credentials::new("me@example.com", "secret"),
        RunOptions {
            backoff: BackoffSchedule::from_secs(backoff),
            lookback_days,
        },
    )
    .with_notifier(Box::new(notifier.clone()))
    .with_sleeper(Box::new(sleeper.clone()));
    Harness {
        _temp: temp,
        app,
        notifier,
        sleeper,
    }
}

fn archived_files(app: &App<MockWhoop>) -> usize {
    Category::ALL
        .iter()
        .map(|category| {
            fs::read_dir(app.persister().archive().partition_dir(*category).as_std_path())
                .map(|entries| entries.count())
                .unwrap_or(0)
        })
        .sum()
}

#[test]
fn authentication_failure_aborts_before_any_fetch() {
    let mock = full_day_mock();
    *mock.auth_results.lock().unwrap() = vec![Err("invalid password".to_string())];
    let h = harness(mock, &[1, 2], 5);

    let err = h.app.run(today()).unwrap_err();

    assert_matches!(err, ArchiveError::Authentication(_));
    assert_eq!(archived_files(&h.app), 0);
    assert!(h.sleeper.waits.lock().unwrap().is_empty());
    let client = h.app.persister().client();
    assert_eq!(*client.auth_calls.lock().unwrap(), 1);
    assert!(client.heart_rate_dates.lock().unwrap().is_empty());
    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].0);
}

#[test]
fn daily_fetch_reports_counts_and_skips_complete_backfill() {
    let h = harness(full_day_mock(), &[1, 2], 1);

    let report = h.app.run(today()).unwrap();

    assert!(report.daily_success());
    assert_eq!(report.date, key("2025-04-24"));
    assert!(report.backfill.is_empty());
    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0);
    assert!(
        sent[0]
            .1
            .contains("10 HR points, 2 sleep events, 1 cycles, 0 activities")
    );
    assert!(h.sleeper.waits.lock().unwrap().is_empty());
}

#[test]
fn daily_fetch_recovers_after_transient_outage() {
    let mock = full_day_mock();
    // Two full attempts fail: four fetches per attempt.
    *mock.outage_calls.lock().unwrap() = 8;
    let h = harness(mock, &[1, 2, 3], 1);

    let report = h.app.run(today()).unwrap();

    assert!(report.daily_success());
    assert_eq!(
        *h.sleeper.waits.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    let client = h.app.persister().client();
    assert_eq!(client.heart_rate_dates.lock().unwrap().len(), 3);
}

#[test]
fn exhausted_daily_fetch_still_runs_backfill() {
    let mock = full_day_mock();
    // Enough failures to exhaust three daily attempts; backfill then succeeds.
    *mock.outage_calls.lock().unwrap() = 12;
    let h = harness(mock, &[1, 2], 3);

    let report = h.app.run(today()).unwrap();

    assert_matches!(report.daily, DailyOutcome::Failed { .. });
    assert_eq!(h.sleeper.waits.lock().unwrap().len(), 2);
    let backfilled: Vec<DateKey> = report.backfill.iter().map(|day| day.date).collect();
    assert_eq!(
        backfilled,
        vec![key("2025-04-24"), key("2025-04-23"), key("2025-04-22")]
    );
    assert_eq!(report.filled_dates().len(), 3);
    assert!(report.backfill_aborted.is_none());

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].0);
    assert!(sent[0].1.contains("3 attempts"));
}

#[test]
fn empty_day_is_not_retried() {
    let h = harness(MockWhoop::default(), &[1, 2], 1);

    let report = h.app.run(today()).unwrap();

    assert!(!report.daily_success());
    assert_matches!(report.daily, DailyOutcome::Completed { .. });
    assert!(h.sleeper.waits.lock().unwrap().is_empty());
    // Nothing archived, so yesterday is retried once by the backfill.
    assert_eq!(report.backfill.len(), 1);
    let sent = h.notifier.sent.lock().unwrap();
    assert!(!sent[0].0);
}

#[test]
fn backfill_fills_only_missing_dates() {
    let h = harness(full_day_mock(), &[1], 5);
    let archive = h.app.persister().archive();
    archive.ensure_partitions().unwrap();
    for date in ["2025-04-23", "2025-04-21", "2025-04-20"] {
        fs::write(archive.heart_rate_path(key(date)).as_std_path(), b"[]").unwrap();
    }

    let report = h.app.run(today()).unwrap();

    let backfilled: Vec<DateKey> = report.backfill.iter().map(|day| day.date).collect();
    assert_eq!(backfilled, vec![key("2025-04-22")]);
    let client = h.app.persister().client();
    assert_eq!(
        *client.heart_rate_dates.lock().unwrap(),
        vec![key("2025-04-24"), key("2025-04-22")]
    );
}

#[test]
fn expired_session_is_renewed_during_backfill() {
    let mock = full_day_mock();
    let past = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    *mock.auth_results.lock().unwrap() = vec![Ok(session(Some(past))), Ok(session(None))];
    let h = harness(mock, &[1], 3);

    let report = h.app.run(today()).unwrap();

    assert_eq!(report.backfill.len(), 2);
    assert_eq!(*h.app.persister().client().auth_calls.lock().unwrap(), 2);
}

#[test]
fn failed_renewal_stops_backfill() {
    let mock = full_day_mock();
    let past = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
    *mock.auth_results.lock().unwrap() =
        vec![Ok(session(Some(past))), Err("token revoked".to_string())];
    let h = harness(mock, &[1], 3);

    let report = h.app.run(today()).unwrap();

    assert!(report.daily_success());
    assert!(report.backfill.is_empty());
    assert!(report.backfill_aborted.unwrap().contains("token revoked"));
}

#[test]
fn notifier_failures_do_not_affect_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let app = App::new(
        Persister::new(Archive::new(root), full_day_mock(), 6),
        Credentials::new("me@example.com", "secret"),
        RunOptions {
            backoff: BackoffSchedule::from_secs(&[1]),
            lookback_days: 1,
        },
    )
    .with_notifier(Box::new(BrokenNotifier))
    .with_sleeper(Box::new(RecordingSleeper::default()));

    let report = app.run(today()).unwrap();

    assert!(report.daily_success());
    assert_eq!(archived_files(&app), 4);
}

#[test]
fn missing_credentials_are_notified_before_exit() {
    let config = Config {
        notify_api_key: Some("o.abc".to_string()),
        ..Config::default()
    };
    assert_eq!(config.notify_api_key(), Some("o.abc"));
    let notifier = RecordingNotifier::default();

    let err = ConfigLoader::resolve_config(config).unwrap_err();
    notify_startup_failure(Some(&notifier), &err);

    assert_matches!(err, ArchiveError::MissingCredentials);
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].0);
    assert!(sent[0].1.contains("WHOOP_EMAIL"));
}
