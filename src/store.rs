use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tempfile::Builder;
use tracing::debug;

use crate::domain::{Category, DateKey};
use crate::error::ArchiveError;

/// On-disk archive rooted at the data directory, one partition per category.
#[derive(Debug, Clone)]
pub struct Archive {
    root: Utf8PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn partition_dir(&self, category: Category) -> Utf8PathBuf {
        self.root.join(category.dir_name())
    }

    pub fn ensure_partitions(&self) -> Result<(), ArchiveError> {
        for category in Category::ALL {
            let dir = self.partition_dir(category);
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| ArchiveError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    pub fn heart_rate_path(&self, date: DateKey) -> Utf8PathBuf {
        self.partition_dir(Category::HeartRate)
            .join(format!("heartRate_{date}.json"))
    }

    pub fn sleep_path(&self, date: DateKey, activity_id: &str) -> Utf8PathBuf {
        self.partition_dir(Category::Sleep)
            .join(format!("sleep_{date}_{activity_id}.json"))
    }

    pub fn cycle_path(&self, date: DateKey) -> Utf8PathBuf {
        self.partition_dir(Category::Cycle)
            .join(format!("cycle_{date}.json"))
    }

    pub fn activity_path(&self, date: DateKey, sport_id: &str, discriminator: &str) -> Utf8PathBuf {
        self.partition_dir(Category::Activity)
            .join(format!("activity_{date}_sport{sport_id}_{discriminator}.json"))
    }

    /// Dates that already have a per-date file in the category partition.
    ///
    /// Only `<prefix>_<YYYY-MM-DD>.json` names count; anything else in the
    /// directory is ignored. A missing or unreadable partition yields an empty
    /// set rather than an error.
    pub fn list_existing_dates(&self, category: Category) -> BTreeSet<DateKey> {
        let dir = self.partition_dir(category);
        let mut dates = BTreeSet::new();
        let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
            debug!(partition = %dir, "partition not readable, treating as empty");
            return dates;
        };
        let pattern = date_file_pattern(category);
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(captures) = pattern.captures(name) else {
                continue;
            };
            if let Ok(date) = captures[1].parse::<DateKey>() {
                dates.insert(date);
            }
        }
        dates
    }

    /// Serializes `value` with 4-space indentation and moves it over `path`
    /// in one rename, so an interrupted write never leaves a partial file.
    pub fn write_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), ArchiveError> {
        let parent = path
            .parent()
            .ok_or_else(|| ArchiveError::Filesystem(format!("invalid destination {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;

        let mut buffer = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        value
            .serialize(&mut serializer)
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;

        let mut temp = Builder::new()
            .prefix(".whoop-archive")
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        temp.write_all(&buffer)
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| ArchiveError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

fn date_file_pattern(category: Category) -> Regex {
    let expr = format!(
        r"^{}_(\d{{4}}-\d{{2}}-\d{{2}})\.json$",
        regex::escape(category.file_prefix())
    );
    Regex::new(&expr).expect("static date file pattern")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let archive = Archive::new("data");
        let date: DateKey = "2025-04-24".parse().unwrap();

        assert_eq!(
            archive.heart_rate_path(date),
            "data/heartRate/heartRate_2025-04-24.json"
        );
        assert_eq!(
            archive.sleep_path(date, "981"),
            "data/sleep/sleep_2025-04-24_981.json"
        );
        assert_eq!(
            archive.cycle_path(date),
            "data/cycles/cycle_2025-04-24.json"
        );
        assert_eq!(
            archive.activity_path(date, "1", "2025-04-24_10-00-00-000"),
            "data/activities/activity_2025-04-24_sport1_2025-04-24_10-00-00-000.json"
        );
    }

    #[test]
    fn date_pattern_ignores_sleep_style_names() {
        let pattern = date_file_pattern(Category::HeartRate);
        assert!(pattern.is_match("heartRate_2025-04-24.json"));
        assert!(!pattern.is_match("heartRate_2025-04-24.json.tmp"));
        assert!(!pattern.is_match("heartRate_2025-04-24_extra.json"));
    }
}
