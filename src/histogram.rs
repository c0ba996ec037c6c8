// 📊 Status Views - current counts and a coarse monthly series
//
// The sources keep no status history, only the current status and when it
// last changed. The monthly histogram therefore replicates each student's
// CURRENT status across every month the student existed. It is a display
// aid, not a point-in-time reconstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entities::{StudentEntry, StudentStatus};

// ============================================================================
// CURRENT COUNTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub active: usize,
    pub paused: usize,
    pub inactive: usize,
    pub no_login: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.active + self.paused + self.inactive + self.no_login
    }

    fn bump(&mut self, status: StudentStatus) {
        match status {
            StudentStatus::Active => self.active += 1,
            StudentStatus::Paused => self.paused += 1,
            StudentStatus::Inactive => self.inactive += 1,
            StudentStatus::NoLogin => self.no_login += 1,
        }
    }
}

/// Count entries per current status
pub fn status_counts(entries: &[StudentEntry]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for entry in entries {
        counts.bump(entry.status);
    }
    counts
}

// ============================================================================
// MONTHLY HISTOGRAM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyStatusCount {
    /// "YYYY-MM"
    pub month: String,
    pub active_count: usize,
    pub paused_count: usize,
    pub inactive_count: usize,
}

impl MonthlyStatusCount {
    fn empty(month: String) -> Self {
        MonthlyStatusCount {
            month,
            active_count: 0,
            paused_count: 0,
            inactive_count: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.active_count + self.paused_count + self.inactive_count
    }
}

fn month_bucket(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m").to_string()
}

/// Build the month-by-month status series.
///
/// Buckets are every distinct month of a creation or last-status-change
/// timestamp, ascending. An entry counts into a bucket when it was created
/// in or before that month; entries with no creation timestamp count
/// everywhere. Record-only entries have no login status and are skipped.
/// Returns nothing when no entry carries a creation timestamp.
pub fn monthly_status_histogram(entries: &[StudentEntry]) -> Vec<MonthlyStatusCount> {
    let accounts: Vec<&StudentEntry> = entries.iter().filter(|e| e.has_login).collect();

    if !accounts.iter().any(|e| e.created_at.is_some()) {
        return Vec::new();
    }

    // "YYYY-MM" sorts lexically in chronological order
    let months: BTreeSet<String> = accounts
        .iter()
        .flat_map(|e| [e.created_at, e.status_changed_at])
        .flatten()
        .map(month_bucket)
        .collect();

    let mut rows: Vec<MonthlyStatusCount> =
        months.into_iter().map(MonthlyStatusCount::empty).collect();

    for entry in &accounts {
        let created_month = entry.created_at.map(month_bucket);

        for row in rows.iter_mut() {
            if matches!(&created_month, Some(created) if row.month < *created) {
                continue;
            }
            match entry.status {
                StudentStatus::Paused => row.paused_count += 1,
                StudentStatus::Inactive => row.inactive_count += 1,
                _ => row.active_count += 1,
            }
        }
    }

    rows
}

// ============================================================================
// TESTS
// ============================================================================
