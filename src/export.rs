use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use csv::WriterBuilder;

use crate::error::{QueueError, QueueResult};
use crate::queue::CheckInEntry;

const HEADERS: [&str; 14] = [
    "check_in_id",
    "clinic_id",
    "patient_id",
    "queue_position",
    "priority",
    "status",
    "visit_reason",
    "check_in_time",
    "called_time",
    "service_start_time",
    "service_end_time",
    "estimated_wait_minutes",
    "actual_wait_minutes",
    "location_verified",
];

fn local_time(time: Option<DateTime<Utc>>, offset: FixedOffset) -> String {
    time.map(|t| t.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Writes check-ins as CSV with a header row. Times are clinic-local.
pub fn write_check_ins<W: Write>(writer: W, entries: &[CheckInEntry], offset: FixedOffset) -> QueueResult<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(HEADERS)?;

    for entry in entries {
        let location_verified = match &entry.location {
            Some(check) if check.verified => "yes",
            Some(_) => "no",
            None => "",
        };
        let queue_position = entry.queue_position.to_string();
        let check_in_time = local_time(Some(entry.check_in_time), offset);
        let called_time = local_time(entry.called_time(), offset);
        let service_start_time = local_time(entry.service_start_time(), offset);
        let service_end_time = local_time(entry.service_end_time(), offset);
        let estimated_wait = entry.estimated_wait_minutes.to_string();
        let actual_wait = entry.actual_wait_minutes().map(|m| m.to_string()).unwrap_or_default();

        wtr.write_record([
            entry.check_in_id.as_str(),
            entry.clinic_id.as_str(),
            entry.patient_id.as_str(),
            queue_position.as_str(),
            entry.priority.as_str(),
            entry.status().as_str(),
            entry.visit_reason.as_str(),
            check_in_time.as_str(),
            called_time.as_str(),
            service_start_time.as_str(),
            service_end_time.as_str(),
            estimated_wait.as_str(),
            actual_wait.as_str(),
            location_verified,
        ])?;
    }

    wtr.flush()
        .map_err(|e| QueueError::Dependency(format!("Failed to write CSV: {}", e)))
}

/// Renders check-ins as a CSV document
pub fn check_ins_to_csv(entries: &[CheckInEntry], offset: FixedOffset) -> QueueResult<String> {
    let mut buffer = Vec::new();
    write_check_ins(&mut buffer, entries, offset)?;
    String::from_utf8(buffer).map_err(|e| QueueError::Dependency(format!("CSV is not valid UTF-8: {}", e)))
}

/// Writes check-ins to a CSV file, replacing any existing file
pub fn export_check_ins_to_file(entries: &[CheckInEntry], csv_path: &Path, offset: FixedOffset) -> QueueResult<()> {
    let file = File::create(csv_path)
        .map_err(|e| QueueError::Dependency(format!("Cannot create {}: {}", csv_path.display(), e)))?;
    write_check_ins(file, entries, offset)
}
