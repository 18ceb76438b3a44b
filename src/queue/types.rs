use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Status of a single check-in. Only `lifecycle` moves an entry between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckInStatus {
    Waiting,
    Called,
    InService,
    Completed,
    Cancelled,
    NoShow,
}

impl CheckInStatus {
    pub const ALL: [CheckInStatus; 6] = [
        CheckInStatus::Waiting,
        CheckInStatus::Called,
        CheckInStatus::InService,
        CheckInStatus::Completed,
        CheckInStatus::Cancelled,
        CheckInStatus::NoShow,
    ];

    /// Counted against the clinic's active-queue size
    pub fn is_active(self) -> bool {
        matches!(self, CheckInStatus::Waiting | CheckInStatus::Called | CheckInStatus::InService)
    }

    /// Still in line, i.e. takes part in rank computation
    pub fn is_queued(self) -> bool {
        matches!(self, CheckInStatus::Waiting | CheckInStatus::Called)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckInStatus::Waiting => "waiting",
            CheckInStatus::Called => "called",
            CheckInStatus::InService => "in-service",
            CheckInStatus::Completed => "completed",
            CheckInStatus::Cancelled => "cancelled",
            CheckInStatus::NoShow => "no-show",
        }
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckInStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckInStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| QueueError::Validation(format!("Unknown check-in status: {}", s)))
    }
}

/// Triage priority, fixed when the patient checks in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Emergency,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Low, Priority::Normal, Priority::High, Priority::Emergency];

    /// Scheduling weight, higher is served first
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Emergency => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoping unit for position counters and daily statistics
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClinicDay {
    pub clinic_id: String,
    pub date: NaiveDate,
}

impl ClinicDay {
    pub fn new(clinic_id: impl Into<String>, date: NaiveDate) -> Self {
        ClinicDay { clinic_id: clinic_id.into(), date }
    }

    /// The clinic-day an instant falls in, with the day boundary at local midnight
    pub fn containing(clinic_id: impl Into<String>, instant: DateTime<Utc>, offset: FixedOffset) -> Self {
        ClinicDay::new(clinic_id, instant.with_timezone(&offset).date_naive())
    }
}

/// Coordinates a patient submits when checking in remotely
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationProof {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

impl LocationProof {
    pub fn validate(&self) -> Result<(), QueueError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(QueueError::Validation(format!("Latitude out of range: {}", self.latitude)));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(QueueError::Validation(format!("Longitude out of range: {}", self.longitude)));
        }
        if let Some(accuracy) = self.accuracy {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(QueueError::Validation(format!("Invalid location accuracy: {}", accuracy)));
            }
        }
        Ok(())
    }
}

/// Outcome of comparing a location proof with the clinic geofence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationCheck {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub verified: bool,
    /// Only set when a geofence was evaluated
    pub distance_from_clinic_m: Option<f64>,
}

/// One patient's visit to one clinic on one day.
///
/// Identity, references, priority and position are fixed at creation. Status,
/// the lifecycle timestamps and `actual_wait_minutes` are written only by
/// `queue::lifecycle`, which is why they sit behind getters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckInEntry {
    pub check_in_id: String,
    pub clinic_id: String,
    pub patient_id: String,
    pub visit_reason: String,
    pub priority: Priority,
    pub queue_position: u32,
    pub check_in_time: DateTime<Utc>,
    pub estimated_wait_minutes: u32,
    pub location: Option<LocationCheck>,
    pub(in crate::queue) status: CheckInStatus,
    pub(in crate::queue) called_time: Option<DateTime<Utc>>,
    pub(in crate::queue) service_start_time: Option<DateTime<Utc>>,
    pub(in crate::queue) service_end_time: Option<DateTime<Utc>>,
    pub(in crate::queue) actual_wait_minutes: Option<i64>,
}

/// Fields the engine supplies when admitting a new entry
#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub clinic_id: String,
    pub patient_id: String,
    pub visit_reason: String,
    pub priority: Priority,
    pub queue_position: u32,
    pub check_in_time: DateTime<Utc>,
    pub estimated_wait_minutes: u32,
    pub location: Option<LocationCheck>,
}

impl CheckInEntry {
    /// Always starts in `waiting`
    pub(crate) fn admit(check_in_id: String, new: NewCheckIn) -> Self {
        CheckInEntry {
            check_in_id,
            clinic_id: new.clinic_id,
            patient_id: new.patient_id,
            visit_reason: new.visit_reason,
            priority: new.priority,
            queue_position: new.queue_position,
            check_in_time: new.check_in_time,
            estimated_wait_minutes: new.estimated_wait_minutes,
            location: new.location,
            status: CheckInStatus::Waiting,
            called_time: None,
            service_start_time: None,
            service_end_time: None,
            actual_wait_minutes: None,
        }
    }

    pub fn status(&self) -> CheckInStatus {
        self.status
    }

    pub fn called_time(&self) -> Option<DateTime<Utc>> {
        self.called_time
    }

    pub fn service_start_time(&self) -> Option<DateTime<Utc>> {
        self.service_start_time
    }

    pub fn service_end_time(&self) -> Option<DateTime<Utc>> {
        self.service_end_time
    }

    pub fn actual_wait_minutes(&self) -> Option<i64> {
        self.actual_wait_minutes
    }

    pub fn clinic_day(&self, offset: FixedOffset) -> ClinicDay {
        ClinicDay::containing(self.clinic_id.clone(), self.check_in_time, offset)
    }
}

/// Live standing of a check-in, as returned by `positionOf`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStanding {
    pub check_in_id: String,
    pub status: CheckInStatus,
    /// None once the entry has left the line
    pub current_rank: Option<u32>,
    pub original_position: u32,
    pub estimated_wait_minutes: Option<u32>,
}

/// Builds a fresh opaque identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
