use csv::{Reader, StringRecord};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::{info, warn};

use super::clinics::Clinic;
use crate::error::{QueueError, QueueResult};
use crate::queue::{Geofence, DEFAULT_RADIUS_M};

/// Parses a boolean value from various string representations
fn parse_bool(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    lower == "yes" || lower == "true" || lower == "1"
}

/// Parses an optional float, treating an empty cell as absent
fn parse_float(value: &str, column: &str, clinic_id: &str) -> QueueResult<Option<f64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| QueueError::Validation(format!("Clinic {}: invalid {} '{}'", clinic_id, column, trimmed)))
}

/// Parses a positive whole number
fn parse_positive(value: &str, column: &str, clinic_id: &str) -> QueueResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(QueueError::Validation(format!(
            "Clinic {}: {} must be a positive whole number, got '{}'",
            clinic_id,
            column,
            value.trim()
        ))),
    }
}

struct Columns {
    clinic_id: usize,
    name: usize,
    is_active: Option<usize>,
    max_queue_size: usize,
    avg_wait_minutes: usize,
    gps_verification: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
    max_distance_meters: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> QueueResult<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).ok_or_else(|| QueueError::Validation(format!("Clinic CSV is missing the '{}' column", name)))
        };
        Ok(Columns {
            clinic_id: require("clinic_id")?,
            name: require("name")?,
            is_active: find("is_active"),
            max_queue_size: require("max_queue_size")?,
            avg_wait_minutes: require("avg_wait_minutes")?,
            gps_verification: find("gps_verification"),
            latitude: find("latitude"),
            longitude: find("longitude"),
            max_distance_meters: find("max_distance_meters"),
        })
    }
}

fn cell<'r>(record: &'r StringRecord, column: Option<usize>) -> &'r str {
    column.and_then(|c| record.get(c)).unwrap_or("")
}

fn parse_row(record: &StringRecord, columns: &Columns) -> QueueResult<Option<Clinic>> {
    let clinic_id = cell(record, Some(columns.clinic_id)).trim().to_string();
    let name = cell(record, Some(columns.name)).trim().to_string();

    // Skip rows without an identity
    if clinic_id.is_empty() || name.is_empty() {
        return Ok(None);
    }

    let is_active = match columns.is_active {
        Some(_) => parse_bool(cell(record, columns.is_active)),
        None => true,
    };
    let max_queue_size = parse_positive(cell(record, Some(columns.max_queue_size)), "max_queue_size", &clinic_id)?;
    let avg_wait_minutes = parse_positive(cell(record, Some(columns.avg_wait_minutes)), "avg_wait_minutes", &clinic_id)?;

    let gps = parse_bool(cell(record, columns.gps_verification));
    let latitude = parse_float(cell(record, columns.latitude), "latitude", &clinic_id)?;
    let longitude = parse_float(cell(record, columns.longitude), "longitude", &clinic_id)?;
    let radius_m = parse_float(cell(record, columns.max_distance_meters), "max_distance_meters", &clinic_id)?
        .unwrap_or(DEFAULT_RADIUS_M);

    let geofence = match (gps, latitude, longitude) {
        (true, Some(latitude), Some(longitude)) => Some(Geofence { latitude, longitude, radius_m }),
        (true, _, _) => {
            warn!("Clinic {} enables GPS verification without coordinates; check-ins will be unverified", clinic_id);
            None
        }
        _ => None,
    };

    Ok(Some(Clinic {
        clinic_id,
        name,
        is_active,
        max_queue_size,
        avg_wait_minutes,
        geofence,
    }))
}

/// Loads the clinic directory from any CSV source with a header row.
/// A later row with the same `clinic_id` replaces an earlier one.
pub fn load_clinics_from_reader<R: Read>(source: R) -> QueueResult<Vec<Clinic>> {
    let mut reader = Reader::from_reader(source);
    let columns = Columns::locate(reader.headers()?)?;

    let mut clinics: HashMap<String, Clinic> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for result in reader.records() {
        let record = result?;
        if let Some(clinic) = parse_row(&record, &columns)? {
            if !clinics.contains_key(&clinic.clinic_id) {
                order.push(clinic.clinic_id.clone());
            }
            clinics.insert(clinic.clinic_id.clone(), clinic);
        }
    }

    Ok(order.into_iter().filter_map(|id| clinics.remove(&id)).collect())
}

/// Loads the clinic directory from a CSV file
pub fn load_clinics<P: AsRef<Path>>(csv_path: P) -> QueueResult<Vec<Clinic>> {
    let path = csv_path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| QueueError::Dependency(format!("Cannot open clinic directory {}: {}", path.display(), e)))?;
    let clinics = load_clinics_from_reader(file)?;
    info!("Loaded {} clinics from {}", clinics.len(), path.display());
    Ok(clinics)
}
