use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-run tallies. Shared by reference between the stages of one run.
#[derive(Debug, Default)]
pub struct RunCounter {
    messages: AtomicU64,
    files: AtomicU64,
    users: AtomicU64,
    channels: AtomicU64,
    pins: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    updated: AtomicU64,
}

impl RunCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_posted(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_uploaded(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn users_added(&self, count: u64) {
        self.users.fetch_add(count, Ordering::Relaxed);
    }

    pub fn channel_synced(&self) {
        self.channels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pin_changed(&self) {
        self.pins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            messages: self.messages.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            users: self.users.load(Ordering::Relaxed),
            channels: self.channels.load(Ordering::Relaxed),
            pins: self.pins.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub messages: u64,
    pub files: u64,
    pub users: u64,
    pub channels: u64,
    pub pins: u64,
    pub errors: u64,
    pub skipped: u64,
    pub updated: u64,
}

impl RunSummary {
    pub fn merge(&mut self, other: &RunSummary) {
        self.messages += other.messages;
        self.files += other.files;
        self.users += other.users;
        self.channels += other.channels;
        self.pins += other.pins;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.updated += other.updated;
    }
}

/// Totals across every run of this process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunHistory {
    pub runs: u64,
    pub failed_runs: u64,
    pub totals: RunSummary,
    pub last: Option<RunSummary>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl RunHistory {
    pub fn record(&mut self, summary: &RunSummary) {
        self.runs += 1;
        self.totals.merge(summary);
        self.last = Some(*summary);
        self.last_finished_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.failed_runs += 1;
        self.last_finished_at = Some(Utc::now());
    }
}

/// The operator-facing text: one counter per line.
impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages - {}\nfiles - {}\nusers - {}\nchannels - {}\npins - {}\nerrors - {}",
            self.messages, self.files, self.users, self.channels, self.pins, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_text_lists_every_counter() {
        let counter = RunCounter::new();
        counter.message_posted();
        counter.message_posted();
        counter.file_uploaded();
        counter.channel_synced();
        counter.error();
        counter.skipped();

        let summary = counter.summary();
        assert_eq!(summary.skipped, 1);
        assert_eq!(
            summary.to_string(),
            "messages - 2\nfiles - 1\nusers - 0\nchannels - 1\npins - 0\nerrors - 1"
        );
    }

    #[test]
    fn merge_accumulates() {
        let mut total = RunSummary::default();
        let run = RunSummary {
            messages: 3,
            errors: 1,
            ..RunSummary::default()
        };
        total.merge(&run);
        total.merge(&run);
        assert_eq!(total.messages, 6);
        assert_eq!(total.errors, 2);
    }

    #[test]
    fn history_keeps_the_last_run() {
        let mut history = RunHistory::default();
        let first = RunSummary {
            messages: 2,
            ..RunSummary::default()
        };
        let second = RunSummary {
            messages: 5,
            pins: 1,
            ..RunSummary::default()
        };
        history.record(&first);
        history.record_failure();
        history.record(&second);

        assert_eq!(history.runs, 2);
        assert_eq!(history.failed_runs, 1);
        assert_eq!(history.totals.messages, 7);
        assert_eq!(history.last, Some(second));
        assert!(history.last_finished_at.is_some());
    }
}
