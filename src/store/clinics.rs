use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::NaiveDate;
use log::{debug, warn};
use serde::Serialize;

use super::ClinicDirectory;
use crate::error::{QueueError, QueueResult};
use crate::queue::{ClinicDay, Geofence};

/// Clinic configuration the queue needs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clinic {
    pub clinic_id: String,
    pub name: String,
    pub is_active: bool,
    pub max_queue_size: u32,
    /// Average service time per patient, drives the wait estimate
    pub avg_wait_minutes: u32,
    /// Present when the clinic asks for GPS verification
    pub geofence: Option<Geofence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClinicCounters {
    /// Active entries of the clinic-day the counters were read for
    pub current_queue_size: u32,
    pub total_check_ins: u64,
    pub total_patients_served: u64,
}

struct ClinicRecord {
    clinic: Clinic,
    /// Active-queue size per local date; a new day starts from zero
    active_by_day: RwLock<HashMap<NaiveDate, AtomicU32>>,
    total_check_ins: AtomicU64,
    total_patients_served: AtomicU64,
}

impl ClinicRecord {
    fn new(clinic: Clinic) -> Self {
        ClinicRecord {
            clinic,
            active_by_day: RwLock::new(HashMap::new()),
            total_check_ins: AtomicU64::new(0),
            total_patients_served: AtomicU64::new(0),
        }
    }

    fn with_day_counter<T>(&self, date: NaiveDate, f: impl FnOnce(&AtomicU32) -> T) -> QueueResult<T> {
        if let Some(counter) = self.active_by_day.read()?.get(&date) {
            return Ok(f(counter));
        }
        let mut days = self.active_by_day.write()?;
        // earlier days that emptied out are never read again
        days.retain(|day, counter| *day >= date || counter.load(Ordering::Acquire) > 0);
        Ok(f(days.entry(date).or_default()))
    }

    fn active_on(&self, date: NaiveDate) -> QueueResult<u32> {
        Ok(self
            .active_by_day
            .read()?
            .get(&date)
            .map_or(0, |counter| counter.load(Ordering::Acquire)))
    }
}

/// Clinic directory held in memory, with lock-free per-clinic counters
#[derive(Default)]
pub struct MemoryClinicDirectory {
    clinics: RwLock<HashMap<String, ClinicRecord>>,
}

impl MemoryClinicDirectory {
    pub fn new(clinics: impl IntoIterator<Item = Clinic>) -> Self {
        let directory = MemoryClinicDirectory::default();
        if let Ok(mut map) = directory.clinics.write() {
            for clinic in clinics {
                map.insert(clinic.clinic_id.clone(), ClinicRecord::new(clinic));
            }
        }
        directory
    }

    /// Soft-deactivates or reactivates a clinic, keeping its counters
    pub fn set_active(&self, clinic_id: &str, is_active: bool) -> QueueResult<()> {
        let mut clinics = self.clinics.write()?;
        let record = clinics
            .get_mut(clinic_id)
            .ok_or_else(|| QueueError::ClinicNotFound(clinic_id.to_string()))?;
        record.clinic.is_active = is_active;
        Ok(())
    }

    fn with_record<T>(&self, clinic_id: &str, f: impl FnOnce(&ClinicRecord) -> QueueResult<T>) -> QueueResult<T> {
        let clinics = self.clinics.read()?;
        let record = clinics
            .get(clinic_id)
            .ok_or_else(|| QueueError::ClinicNotFound(clinic_id.to_string()))?;
        f(record)
    }
}

impl ClinicDirectory for MemoryClinicDirectory {
    fn get_clinic(&self, clinic_id: &str) -> QueueResult<Option<Clinic>> {
        Ok(self.clinics.read()?.get(clinic_id).map(|record| record.clinic.clone()))
    }

    fn list_active(&self) -> QueueResult<Vec<Clinic>> {
        let mut clinics: Vec<Clinic> = self
            .clinics
            .read()?
            .values()
            .filter(|record| record.clinic.is_active)
            .map(|record| record.clinic.clone())
            .collect();
        clinics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clinics)
    }

    fn increment_active_queue(&self, day: &ClinicDay) -> QueueResult<u32> {
        self.with_record(&day.clinic_id, |record| {
            let max = record.clinic.max_queue_size;
            let previous = record
                .with_day_counter(day.date, |counter| {
                    counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| (size < max).then_some(size + 1))
                })?
                .map_err(|_| QueueError::QueueFull {
                    clinic_id: day.clinic_id.clone(),
                    max_queue_size: max,
                })?;
            Ok(previous + 1)
        })
    }

    fn decrement_active_queue(&self, day: &ClinicDay) -> QueueResult<u32> {
        self.with_record(&day.clinic_id, |record| {
            let previous = record.with_day_counter(day.date, |counter| {
                counter
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| Some(size.saturating_sub(1)))
                    .unwrap_or(0)
            })?;
            if previous == 0 {
                warn!("Active queue counter for clinic {} on {} was already zero", day.clinic_id, day.date);
            } else {
                debug!("Clinic {} on {}: {} active", day.clinic_id, day.date, previous - 1);
            }
            Ok(previous.saturating_sub(1))
        })
    }

    fn record_check_in(&self, clinic_id: &str) -> QueueResult<u64> {
        self.with_record(clinic_id, |record| Ok(record.total_check_ins.fetch_add(1, Ordering::AcqRel) + 1))
    }

    fn increment_served_count(&self, clinic_id: &str) -> QueueResult<u64> {
        self.with_record(clinic_id, |record| Ok(record.total_patients_served.fetch_add(1, Ordering::AcqRel) + 1))
    }

    fn counters(&self, day: &ClinicDay) -> QueueResult<ClinicCounters> {
        self.with_record(&day.clinic_id, |record| {
            Ok(ClinicCounters {
                current_queue_size: record.active_on(day.date)?,
                total_check_ins: record.total_check_ins.load(Ordering::Acquire),
                total_patients_served: record.total_patients_served.load(Ordering::Acquire),
            })
        })
    }
}
