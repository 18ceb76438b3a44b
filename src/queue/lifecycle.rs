use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueueError;
use super::types::{CheckInEntry, CheckInStatus};

/// Counter changes the clinic directory must apply after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterEffect {
    pub leaves_active_queue: bool,
    pub served: bool,
}

/// Result of applying a transition to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: CheckInStatus,
    pub to: CheckInStatus,
    pub effect: CounterEffect,
}

impl Transition {
    /// Re-applying the current status changes nothing
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Whether `from -> to` is in the transition table
pub fn is_legal(from: CheckInStatus, to: CheckInStatus) -> bool {
    use CheckInStatus::*;
    matches!(
        (from, to),
        (Waiting, Called)
            | (Waiting, Cancelled)
            | (Called, InService)
            | (Called, Cancelled)
            | (Called, NoShow)
            | (InService, Completed)
    )
}

/// Moves `entry` to `to`, stamping the matching timestamp.
///
/// Timestamps are written at most once: if one is already present it is kept.
/// A request for the status the entry already has is accepted and leaves the
/// entry untouched.
pub fn apply(entry: &mut CheckInEntry, to: CheckInStatus, now: DateTime<Utc>) -> Result<Transition, QueueError> {
    let from = entry.status;
    if from == to {
        return Ok(Transition { from, to, effect: CounterEffect::default() });
    }
    if !is_legal(from, to) {
        return Err(QueueError::InvalidTransition { from, to });
    }

    let mut effect = CounterEffect::default();
    match to {
        CheckInStatus::Called => {
            entry.called_time.get_or_insert(now);
        }
        CheckInStatus::InService => {
            let started = *entry.service_start_time.get_or_insert(now);
            if entry.actual_wait_minutes.is_none() {
                entry.actual_wait_minutes = Some(wait_minutes(entry.check_in_time, started));
            }
        }
        CheckInStatus::Completed => {
            entry.service_end_time.get_or_insert(now);
            effect.leaves_active_queue = true;
            effect.served = true;
        }
        CheckInStatus::Cancelled | CheckInStatus::NoShow => {
            effect.leaves_active_queue = true;
        }
        // never a legal target
        CheckInStatus::Waiting => {}
    }
    entry.status = to;

    Ok(Transition { from, to, effect })
}

/// Minutes between check-in and service start, rounded to the nearest minute
pub fn wait_minutes(check_in_time: DateTime<Utc>, service_start: DateTime<Utc>) -> i64 {
    let millis = (service_start - check_in_time).num_milliseconds();
    (millis as f64 / 60_000.0).round() as i64
}
