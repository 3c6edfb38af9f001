use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use whoop_archive::app::{App, RunOptions};
use whoop_archive::config::{Config, ConfigLoader};
use whoop_archive::domain::DateKey;
use whoop_archive::error::ArchiveError;
use whoop_archive::notify::{Notifier, PushbulletNotifier, notify_startup_failure};
use whoop_archive::persist::Persister;
use whoop_archive::store::Archive;
use whoop_archive::whoop::WhoopHttpClient;

#[derive(Parser)]
#[command(name = "whoop-archive")]
#[command(about = "Archive yesterday's WHOOP data and backfill missing days")]
#[command(version, author)]
struct Cli {
    /// Path to a whoop-archive.json config file
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ArchiveError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiveError) -> u8 {
    match error {
        ArchiveError::MissingCredentials
        | ArchiveError::ConfigRead(_)
        | ArchiveError::ConfigParse(_)
        | ArchiveError::InvalidConfig(_) => 2,
        ArchiveError::Authentication(_)
        | ArchiveError::WhoopHttp(_)
        | ArchiveError::WhoopStatus { .. }
        | ArchiveError::WhoopPayload(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            // The file is unusable; the environment may still name a notifier.
            let env_only = ConfigLoader::apply_env(Config::default(), |key| {
                std::env::var(key).ok()
            })
            .unwrap_or_default();
            let notifier = build_notifier(env_only.notify_api_key());
            notify_startup_failure(notifier.as_ref().map(|n| n as &dyn Notifier), &err);
            return Err(err.into());
        }
    };

    let notifier = build_notifier(config.notify_api_key());
    let config = match ConfigLoader::resolve_config(config) {
        Ok(config) => config,
        Err(err) => {
            notify_startup_failure(notifier.as_ref().map(|n| n as &dyn Notifier), &err);
            return Err(err.into());
        }
    };

    let client = match WhoopHttpClient::new() {
        Ok(client) => client,
        Err(err) => {
            notify_startup_failure(notifier.as_ref().map(|n| n as &dyn Notifier), &err);
            return Err(err.into());
        }
    };

    let persister = Persister::new(
        Archive::new(config.data_dir.clone()),
        client,
        config.heart_rate_step_secs,
    );
    let options = RunOptions {
        backoff: config.backoff.clone(),
        lookback_days: config.lookback_days,
    };
    let mut app = App::new(persister, config.credentials.clone(), options);
    if let Some(notifier) = notifier {
        app = app.with_notifier(Box::new(notifier));
    }

    let today = DateKey::new(Local::now().date_naive());
    let report = app.run(today)?;
    let summary = serde_json::to_string_pretty(&report).into_diagnostic()?;
    println!("{summary}");
    Ok(())
}

fn build_notifier(api_key: Option<&str>) -> Option<PushbulletNotifier> {
    let key = api_key?;
    match PushbulletNotifier::new(key) {
        Ok(notifier) => Some(notifier),
        Err(err) => {
            warn!(error = %err, "notifications disabled");
            None
        }
    }
}
