use std::cmp::{Ordering, Reverse};

use super::types::{CheckInEntry, CheckInStatus};

/// Position handed to the next check-in of a clinic-day, given how many
/// entries that clinic-day has already created (any status).
pub fn next_position(created_for_day: usize) -> u32 {
    u32::try_from(created_for_day).unwrap_or(u32::MAX - 1) + 1
}

/// Who is served first: higher priority rank, then earlier queue position.
///
/// Both call-next selection and rank queries go through this comparison so
/// the displayed rank never drifts from the actual calling order.
pub fn serve_order(a: &CheckInEntry, b: &CheckInEntry) -> Ordering {
    serve_key(a.priority.rank(), a.queue_position).cmp(&serve_key(b.priority.rank(), b.queue_position))
}

fn serve_key(priority_rank: u8, queue_position: u32) -> (Reverse<u8>, u32) {
    (Reverse(priority_rank), queue_position)
}

/// 1-based rank of `entry` among the queued (waiting or called) entries.
/// Returns None when the entry itself is no longer in line.
pub fn rank(entry: &CheckInEntry, active: &[CheckInEntry]) -> Option<u32> {
    if !entry.status().is_queued() {
        return None;
    }
    let ahead = active
        .iter()
        .filter(|other| other.check_in_id != entry.check_in_id)
        .filter(|other| other.status().is_queued())
        .filter(|other| serve_order(other, entry) == Ordering::Less)
        .count();
    Some(ahead as u32 + 1)
}

/// Rank a not-yet-created entry would get if admitted with this priority and
/// position. Used for the check-in estimate.
pub fn rank_on_admission(priority_rank: u8, queue_position: u32, active: &[CheckInEntry]) -> u32 {
    let key = serve_key(priority_rank, queue_position);
    let ahead = active
        .iter()
        .filter(|other| other.status().is_queued())
        .filter(|other| serve_key(other.priority.rank(), other.queue_position) < key)
        .count();
    ahead as u32 + 1
}

/// The waiting entry that should be called next, if any
pub fn select_next(active: &[CheckInEntry]) -> Option<&CheckInEntry> {
    active
        .iter()
        .filter(|entry| entry.status() == CheckInStatus::Waiting)
        .min_by(|a, b| serve_order(a, b))
}
