use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDate, Timelike};
use serde::Serialize;

use crate::queue::{CheckInEntry, CheckInStatus, Priority};

/// Most visits returned by [`patient_history`]
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WaitTimeStats {
    pub avg_wait_minutes: f64,
    pub min_wait_minutes: i64,
    pub max_wait_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicAnalytics {
    pub clinic_id: String,
    pub total_check_ins: usize,
    pub status_breakdown: BTreeMap<&'static str, usize>,
    pub priority_breakdown: BTreeMap<&'static str, usize>,
    pub wait_time: WaitTimeStats,
    /// Check-ins per clinic-local hour of day
    pub hourly_distribution: BTreeMap<u32, usize>,
    pub daily_check_ins: BTreeMap<NaiveDate, usize>,
}

/// Optional clinic-local date bounds, both inclusive
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, entry: &CheckInEntry, offset: FixedOffset) -> bool {
        let date = entry.check_in_time.with_timezone(&offset).date_naive();
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

fn wait_stats(entries: &[CheckInEntry]) -> WaitTimeStats {
    let waits: Vec<i64> = entries.iter().filter_map(|e| e.actual_wait_minutes()).collect();
    if waits.is_empty() {
        return WaitTimeStats::default();
    }
    let total: i64 = waits.iter().sum();
    WaitTimeStats {
        avg_wait_minutes: total as f64 / waits.len() as f64,
        min_wait_minutes: waits.iter().copied().min().unwrap_or(0),
        max_wait_minutes: waits.iter().copied().max().unwrap_or(0),
    }
}

/// Summarises a clinic's check-ins that fall inside `range`
pub fn clinic_analytics(
    clinic_id: &str,
    entries: &[CheckInEntry],
    range: DateRange,
    offset: FixedOffset,
) -> ClinicAnalytics {
    let selected: Vec<CheckInEntry> = entries
        .iter()
        .filter(|e| e.clinic_id == clinic_id && range.contains(e, offset))
        .cloned()
        .collect();

    let mut status_breakdown = BTreeMap::new();
    let mut priority_breakdown = BTreeMap::new();
    let mut hourly_distribution = BTreeMap::new();
    let mut daily_check_ins = BTreeMap::new();

    for entry in &selected {
        *status_breakdown.entry(entry.status().as_str()).or_insert(0) += 1;
        *priority_breakdown.entry(entry.priority.as_str()).or_insert(0) += 1;

        let local = entry.check_in_time.with_timezone(&offset);
        *hourly_distribution.entry(local.hour()).or_insert(0) += 1;
        *daily_check_ins.entry(local.date_naive()).or_insert(0) += 1;
    }

    ClinicAnalytics {
        clinic_id: clinic_id.to_string(),
        total_check_ins: selected.len(),
        status_breakdown,
        priority_breakdown,
        wait_time: wait_stats(&selected),
        hourly_distribution,
        daily_check_ins,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientHistory {
    pub patient_id: String,
    pub total_visits: usize,
    pub completed_visits: usize,
    pub visits: Vec<CheckInEntry>,
}

/// A patient's visits, newest first, capped at [`HISTORY_LIMIT`]
pub fn patient_history(patient_id: &str, entries: &[CheckInEntry]) -> PatientHistory {
    let mut visits: Vec<CheckInEntry> = entries.iter().filter(|e| e.patient_id == patient_id).cloned().collect();
    visits.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time));
    let total_visits = visits.len();
    let completed_visits = visits.iter().filter(|e| e.status() == CheckInStatus::Completed).count();
    visits.truncate(HISTORY_LIMIT);

    PatientHistory {
        patient_id: patient_id.to_string(),
        total_visits,
        completed_visits,
        visits,
    }
}

/// Count of entries per priority, highest first; handy for terminal output
pub fn priority_counts(entries: &[CheckInEntry]) -> Vec<(Priority, usize)> {
    let mut counts: Vec<(Priority, usize)> = Priority::ALL
        .iter()
        .map(|&p| (p, entries.iter().filter(|e| e.priority == p).count()))
        .collect();
    counts.sort_by(|a, b| b.0.rank().cmp(&a.0.rank()));
    counts
}
