//! Collaborators behind the queue engine: check-in storage, the clinic
//! directory with its atomic counters, and the patient registry.
//!
//! The engine only talks to the traits; the in-memory implementations here
//! back the web server, the demo and the tests.

pub mod checkins;
pub mod clinics;
pub mod parser;
pub mod patients;

use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::queue::{CheckInEntry, CheckInStatus, ClinicDay};

pub use checkins::MemoryCheckIns;
pub use clinics::{Clinic, ClinicCounters, MemoryClinicDirectory};
pub use parser::{load_clinics, load_clinics_from_reader};
pub use patients::{MemoryPatientRegistry, Patient, PatientInfo};

/// Outcome of an update guarded by the entry's current status
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    Applied(CheckInEntry),
    /// Someone else moved the entry first; carries the status found
    StatusMismatch(CheckInStatus),
}

/// Builds the entry to insert, given the clinic-day's created count and its
/// active entries. Runs while the clinic-day is locked.
pub type EntryBuilder<'a> = dyn FnMut(usize, &[CheckInEntry]) -> QueueResult<CheckInEntry> + 'a;

/// Mutates an entry in place; an error leaves the stored entry unchanged
pub type EntryMutation<'a> = dyn FnMut(&mut CheckInEntry) -> QueueResult<()> + 'a;

pub trait CheckInRepository: Send + Sync {
    /// Inserts the entry produced by `build`. Counting and inserting happen as
    /// one step per clinic-day, so concurrent check-ins never share a position.
    fn create(&self, day: &ClinicDay, build: &mut EntryBuilder<'_>) -> QueueResult<CheckInEntry>;

    fn find_by_id(&self, check_in_id: &str) -> QueueResult<Option<CheckInEntry>>;

    /// Every entry created for the clinic-day, whatever its status
    fn find_by_clinic_day(&self, day: &ClinicDay) -> QueueResult<Vec<CheckInEntry>>;

    fn find_active_by_clinic_day(&self, day: &ClinicDay) -> QueueResult<Vec<CheckInEntry>> {
        Ok(self
            .find_by_clinic_day(day)?
            .into_iter()
            .filter(|entry| entry.status().is_active())
            .collect())
    }

    fn count_active_by_clinic_day(&self, day: &ClinicDay) -> QueueResult<usize> {
        Ok(self.find_active_by_clinic_day(day)?.len())
    }

    fn find_by_clinic(&self, clinic_id: &str) -> QueueResult<Vec<CheckInEntry>>;

    fn find_by_patient(&self, patient_id: &str) -> QueueResult<Vec<CheckInEntry>>;

    /// Applies `mutate` only if the entry is still in `expected` status
    fn update_status(
        &self,
        check_in_id: &str,
        expected: CheckInStatus,
        mutate: &mut EntryMutation<'_>,
    ) -> QueueResult<ConditionalUpdate>;
}

pub trait ClinicDirectory: Send + Sync {
    fn get_clinic(&self, clinic_id: &str) -> QueueResult<Option<Clinic>>;

    fn list_active(&self) -> QueueResult<Vec<Clinic>>;

    /// Reserves one active-queue place on the clinic-day. Fails with
    /// `QueueFull` when that day is at `max_queue_size`; check and increment
    /// are one atomic step.
    fn increment_active_queue(&self, day: &ClinicDay) -> QueueResult<u32>;

    fn decrement_active_queue(&self, day: &ClinicDay) -> QueueResult<u32>;

    /// Counts a completed check-in toward the clinic's lifetime total
    fn record_check_in(&self, clinic_id: &str) -> QueueResult<u64>;

    fn increment_served_count(&self, clinic_id: &str) -> QueueResult<u64>;

    /// Lifetime totals plus the active-queue size of `day`
    fn counters(&self, day: &ClinicDay) -> QueueResult<ClinicCounters>;
}

pub trait PatientRegistry: Send + Sync {
    /// Returns the known patient for `info.patient_id`, or a validated new
    /// patient that is not stored until `save`
    fn prepare(&self, info: &PatientInfo, now: DateTime<Utc>) -> QueueResult<Patient>;

    /// Stores a prepared patient; saving a known patient again is a no-op
    fn save(&self, patient: &Patient) -> QueueResult<()>;

    fn resolve(&self, info: &PatientInfo, now: DateTime<Utc>) -> QueueResult<Patient> {
        let patient = self.prepare(info, now)?;
        self.save(&patient)?;
        Ok(patient)
    }

    fn find(&self, patient_id: &str) -> QueueResult<Option<Patient>>;
}
