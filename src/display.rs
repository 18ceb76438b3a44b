use chrono::FixedOffset;

use crate::queue::{CheckInStatus, ClinicQueueSnapshot, Priority, SnapshotEntry};
use crate::store::{Clinic, ClinicCounters};

/// Formats a queue line label with a priority tag for anything above normal
pub fn format_queue_label(priority: Priority, patient: &str) -> String {
    if priority.rank() <= Priority::Normal.rank() {
        patient.to_string()
    } else {
        format!("[{}] {}", priority.as_str().to_uppercase(), patient)
    }
}

fn format_rank(entry: &SnapshotEntry) -> String {
    match (entry.status, entry.current_rank) {
        (CheckInStatus::InService, _) => "--".to_string(),
        (_, Some(rank)) => format!("#{}", rank),
        (_, None) => "?".to_string(),
    }
}

/// Prints a clinic's queue board in a readable format
pub fn print_queue_snapshot<F>(clinic: &Clinic, snapshot: &ClinicQueueSnapshot, offset: FixedOffset, patient_name: F)
where
    F: Fn(&str) -> String,
{
    println!("\n=== {} ({}) ===", clinic.name, snapshot.date);
    println!(
        "In queue: {} | Checked in today: {} | Served today: {} | Average wait: {} min",
        snapshot.queue_size, snapshot.checked_in_today, snapshot.served_today, snapshot.average_wait_minutes
    );

    if snapshot.current_queue.is_empty() {
        println!("  (nobody waiting)");
        return;
    }

    for entry in &snapshot.current_queue {
        let label = format_queue_label(entry.priority, &patient_name(&entry.patient_id));
        println!(
            "  {:>4} {:<28} {:<10} arrived {} (slot {}, ~{} min) - {}",
            format_rank(entry),
            label,
            entry.status.as_str(),
            entry.check_in_time.with_timezone(&offset).format("%H:%M"),
            entry.queue_position,
            entry.estimated_wait_minutes,
            entry.visit_reason
        );
    }
}

pub fn print_clinic_counters(clinic: &Clinic, counters: &ClinicCounters) {
    println!(
        "{}: {} active / {} max, {} check-ins, {} served",
        clinic.name,
        counters.current_queue_size,
        clinic.max_queue_size,
        counters.total_check_ins,
        counters.total_patients_served
    );
}
