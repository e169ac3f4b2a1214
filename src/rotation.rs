//! Rotation policy: when a log file is replaced and what happens to the old one.

use crate::error::ConfigError;
use crate::file::LogFile;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc, Weekday};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Unit or anchor of the time-based rotation schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum When {
    Seconds,
    Minutes,
    Hours,
    Days,
    Midnight,
    /// Weekly, on the given day.
    Weekday(Weekday),
}

impl FromStr for When {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let when = match upper.as_str() {
            "S" => When::Seconds,
            "M" => When::Minutes,
            "H" => When::Hours,
            "D" => When::Days,
            "MIDNIGHT" => When::Midnight,
            "W0" => When::Weekday(Weekday::Mon),
            "W1" => When::Weekday(Weekday::Tue),
            "W2" => When::Weekday(Weekday::Wed),
            "W3" => When::Weekday(Weekday::Thu),
            "W4" => When::Weekday(Weekday::Fri),
            "W5" => When::Weekday(Weekday::Sat),
            "W6" => When::Weekday(Weekday::Sun),
            _ => {
                return Err(ConfigError::InvalidOption {
                    option: "when",
                    reason: format!(
                        "`{s}` is not one of S, M, H, D, MIDNIGHT or W0..W6 (0 = Monday)"
                    ),
                })
            }
        };
        Ok(when)
    }
}

impl TryFrom<String> for When {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            When::Seconds => f.write_str("S"),
            When::Minutes => f.write_str("M"),
            When::Hours => f.write_str("H"),
            When::Days => f.write_str("D"),
            When::Midnight => f.write_str("MIDNIGHT"),
            When::Weekday(day) => write!(f, "W{}", day.num_days_from_monday()),
        }
    }
}

/// Time-based rotation schedule: an anchor or unit, a count, and for the
/// anchored variants an optional time of day. All boundaries are in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub when: When,
    pub interval: u32,
    pub at_time: Option<NaiveTime>,
}

impl Schedule {
    pub fn new(when: When, interval: u32, at_time: Option<NaiveTime>) -> Result<Self, ConfigError> {
        if interval == 0 {
            return Err(ConfigError::InvalidOption {
                option: "interval",
                reason: "must be a positive integer".to_string(),
            });
        }
        Ok(Schedule {
            when,
            interval,
            at_time,
        })
    }

    pub fn midnight() -> Self {
        Schedule {
            when: When::Midnight,
            interval: 1,
            at_time: None,
        }
    }

    /// First boundary strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let n = i64::from(self.interval);
        match self.when {
            When::Seconds => now + ChronoDuration::seconds(n),
            When::Minutes => now + ChronoDuration::minutes(n),
            When::Hours => now + ChronoDuration::hours(n),
            When::Days => now + ChronoDuration::days(n),
            When::Midnight => {
                let mut next = self.anchored(now.date_naive(), now);
                if next <= now {
                    next += ChronoDuration::days(1);
                }
                next + ChronoDuration::days(n - 1)
            }
            When::Weekday(day) => {
                let ahead = (i64::from(day.num_days_from_monday())
                    - i64::from(now.weekday().num_days_from_monday())
                    + 7)
                    % 7;
                let date = now.date_naive() + ChronoDuration::days(ahead);
                let mut next = self.anchored(date, now);
                if next <= now {
                    next += ChronoDuration::weeks(1);
                }
                next + ChronoDuration::weeks(n - 1)
            }
        }
    }

    fn anchored(&self, date: chrono::NaiveDate, fallback: DateTime<Utc>) -> DateTime<Utc> {
        let time = self.at_time.unwrap_or(NaiveTime::MIN);
        Utc.from_local_datetime(&date.and_time(time))
            .single()
            .unwrap_or(fallback)
    }
}

/// How rotated files are named and pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupNaming {
    /// `app.log.1`, `app.log.2`, ... with `.1` the most recent.
    #[default]
    #[serde(alias = "count")]
    Indexed,
    /// `app.log.2025-01-24_17-03-32-4642`, ordered by the rotation instant.
    #[serde(alias = "time")]
    Timestamped,
}

/// Why a rotation fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Size,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size ceiling in bytes; `0` disables size-based rotation.
    pub max_bytes: u64,
    pub schedule: Option<Schedule>,
    /// Number of rotated files to keep; `0` discards them.
    pub backup_count: usize,
    pub naming: BackupNaming,
}

/// Mutable rotation state owned by a single file handler.
#[derive(Debug)]
pub(crate) struct Rotator {
    policy: RotationPolicy,
    next_rollover: Option<DateTime<Utc>>,
    last_stamp: Option<DateTime<Utc>>,
}

impl Rotator {
    pub fn new(policy: RotationPolicy, now: DateTime<Utc>) -> Self {
        let next_rollover = policy.schedule.map(|s| s.next_after(now));
        Rotator {
            policy,
            next_rollover,
            last_stamp: None,
        }
    }

    pub fn next_rollover(&self) -> Option<DateTime<Utc>> {
        self.next_rollover
    }

    /// Evaluate the triggers after a write. Size is checked first; at most one
    /// trigger is returned.
    pub fn check(&self, size: u64, at: DateTime<Utc>) -> Option<Trigger> {
        if self.policy.max_bytes > 0 && size >= self.policy.max_bytes {
            return Some(Trigger::Size);
        }
        match self.next_rollover {
            Some(boundary) if at >= boundary => Some(Trigger::Time),
            _ => None,
        }
    }

    /// Close `file`, archive it under the backup policy, open a fresh file at
    /// the same path and schedule the next boundary from `at`.
    ///
    /// The boundary only moves once the archive succeeded, so a failed time
    /// rotation is retried on the next record.
    pub fn rotate(&mut self, file: &mut LogFile, at: DateTime<Utc>) -> io::Result<()> {
        file.close()?;
        let archived = self.archive(file.path(), at);
        // A fresh file is opened even when archiving failed so that writes
        // keep landing somewhere.
        let reopened = file.reopen();
        if archived.is_ok() {
            if let Some(schedule) = self.policy.schedule {
                self.next_rollover = Some(schedule.next_after(at));
            }
        }
        archived.and(reopened)
    }

    fn archive(&mut self, path: &Path, at: DateTime<Utc>) -> io::Result<()> {
        if !path.exists() {
            return Ok(());
        }
        if self.policy.backup_count == 0 {
            return fs::remove_file(path);
        }
        match self.policy.naming {
            BackupNaming::Indexed => shift_indexed(path, self.policy.backup_count),
            BackupNaming::Timestamped => {
                let stamp = self.unique_stamp(at);
                fs::rename(path, suffixed(path, &timestamp_suffix(stamp)))?;
                prune_timestamped(path, self.policy.backup_count)
            }
        }
    }

    /// Rotation instant, bumped forward when it would not sort after the
    /// previous backup of this handler.
    fn unique_stamp(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        let tick = ChronoDuration::microseconds(100);
        let stamp = match self.last_stamp {
            Some(last) if truncate_to_tick(at) <= truncate_to_tick(last) => last + tick,
            _ => at,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

fn truncate_to_tick(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros() / 100
}

pub(crate) fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// `YYYY-MM-DD_HH-MM-SS-ffff` with four fractional digits (100 µs).
pub fn timestamp_suffix(at: DateTime<Utc>) -> String {
    format!(
        "{}-{:04}",
        at.format("%Y-%m-%d_%H-%M-%S"),
        at.timestamp_subsec_micros() / 100
    )
}

pub fn is_timestamp_suffix(suffix: &str) -> bool {
    const PATTERN: &[u8] = b"dddd-dd-dd_dd-dd-dd-dddd";
    let bytes = suffix.as_bytes();
    bytes.len() == PATTERN.len()
        && bytes.iter().zip(PATTERN).all(|(b, p)| match p {
            b'd' => b.is_ascii_digit(),
            sep => b == sep,
        })
}

fn shift_indexed(path: &Path, backup_count: usize) -> io::Result<()> {
    let oldest = suffixed(path, &backup_count.to_string());
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..backup_count).rev() {
        let from = suffixed(path, &index.to_string());
        if from.exists() {
            fs::rename(&from, suffixed(path, &(index + 1).to_string()))?;
        }
    }
    fs::rename(path, suffixed(path, "1"))
}

/// Timestamped backups of `path`, oldest first.
pub fn timestamped_backups(path: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{base}.");

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(suffix) = name.strip_prefix(&prefix) {
            if is_timestamp_suffix(suffix) {
                found.push((suffix.to_string(), entry.path()));
            }
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn prune_timestamped(path: &Path, backup_count: usize) -> io::Result<()> {
    let backups = timestamped_backups(path)?;
    let excess = backups.len().saturating_sub(backup_count);
    for old in &backups[..excess] {
        fs::remove_file(old)?;
    }
    Ok(())
}
