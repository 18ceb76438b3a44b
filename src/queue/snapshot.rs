use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::ordering::{rank, serve_order};
use super::types::{CheckInEntry, CheckInStatus, ClinicDay, Priority};

/// One active check-in as shown on the clinic board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub check_in_id: String,
    pub patient_id: String,
    pub queue_position: u32,
    pub current_rank: Option<u32>,
    pub status: CheckInStatus,
    pub priority: Priority,
    pub check_in_time: DateTime<Utc>,
    pub estimated_wait_minutes: u32,
    pub visit_reason: String,
}

/// Read model of one clinic-day, derived entirely from its check-ins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicQueueSnapshot {
    pub clinic_id: String,
    pub date: NaiveDate,
    pub queue_size: usize,
    /// In-service first, then the line in serving order
    pub current_queue: Vec<SnapshotEntry>,
    pub checked_in_today: usize,
    pub served_today: usize,
    pub average_wait_minutes: i64,
}

/// Rebuilds the snapshot from every check-in created for `day`
pub fn build(day: &ClinicDay, entries: &[CheckInEntry]) -> ClinicQueueSnapshot {
    let day_entries: Vec<&CheckInEntry> = entries
        .iter()
        .filter(|entry| entry.clinic_id == day.clinic_id)
        .collect();

    let active: Vec<CheckInEntry> = day_entries
        .iter()
        .filter(|entry| entry.status().is_active())
        .map(|entry| (*entry).clone())
        .collect();

    let mut in_service: Vec<&CheckInEntry> = active
        .iter()
        .filter(|entry| entry.status() == CheckInStatus::InService)
        .collect();
    in_service.sort_by_key(|entry| entry.service_start_time());

    let mut queued: Vec<&CheckInEntry> = active.iter().filter(|entry| entry.status().is_queued()).collect();
    queued.sort_by(|a, b| serve_order(a, b));

    let current_queue = in_service
        .into_iter()
        .chain(queued)
        .map(|entry| SnapshotEntry {
            check_in_id: entry.check_in_id.clone(),
            patient_id: entry.patient_id.clone(),
            queue_position: entry.queue_position,
            current_rank: rank(entry, &active),
            status: entry.status(),
            priority: entry.priority,
            check_in_time: entry.check_in_time,
            estimated_wait_minutes: entry.estimated_wait_minutes,
            visit_reason: entry.visit_reason.clone(),
        })
        .collect();

    let served_today = day_entries
        .iter()
        .filter(|entry| entry.status() == CheckInStatus::Completed)
        .count();

    ClinicQueueSnapshot {
        clinic_id: day.clinic_id.clone(),
        date: day.date,
        queue_size: active.len(),
        current_queue,
        checked_in_today: day_entries.len(),
        served_today,
        average_wait_minutes: average_wait(day_entries.iter().copied()),
    }
}

/// Mean of recorded actual waits, rounded; 0 when nobody has been seen yet
pub fn average_wait<'a>(entries: impl Iterator<Item = &'a CheckInEntry>) -> i64 {
    let waits: Vec<i64> = entries.filter_map(CheckInEntry::actual_wait_minutes).collect();
    if waits.is_empty() {
        return 0;
    }
    (waits.iter().sum::<i64>() as f64 / waits.len() as f64).round() as i64
}
