use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PatientRegistry;
use crate::error::{QueueError, QueueResult};
use crate::queue::new_id;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub patient_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Patient details submitted with a check-in
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    pub patient_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Validates the fields needed to register a new patient
fn validate_new_patient(info: &PatientInfo) -> QueueResult<(String, String)> {
    let first = info.first_name.as_deref().map(str::trim).unwrap_or("");
    let last = info.last_name.as_deref().map(str::trim).unwrap_or("");
    if first.is_empty() {
        return Err(QueueError::Validation("First name is required".to_string()));
    }
    if last.is_empty() {
        return Err(QueueError::Validation("Last name is required".to_string()));
    }
    if let Some(email) = info.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if !email.contains('@') {
            return Err(QueueError::Validation(format!("Invalid email address: {}", email)));
        }
    }
    Ok((first.to_string(), last.to_string()))
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[derive(Default)]
pub struct MemoryPatientRegistry {
    patients: RwLock<HashMap<String, Patient>>,
}

impl MemoryPatientRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatientRegistry for MemoryPatientRegistry {
    fn prepare(&self, info: &PatientInfo, now: DateTime<Utc>) -> QueueResult<Patient> {
        if let Some(id) = info.patient_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            if let Some(existing) = self.patients.read()?.get(id) {
                return Ok(existing.clone());
            }
        }

        // unknown or missing id: a fresh patient
        let (first_name, last_name) = validate_new_patient(info)?;
        Ok(Patient {
            patient_id: new_id(),
            first_name,
            last_name,
            phone: non_blank(&info.phone),
            email: non_blank(&info.email),
            created_at: now,
        })
    }

    fn save(&self, patient: &Patient) -> QueueResult<()> {
        self.patients
            .write()?
            .entry(patient.patient_id.clone())
            .or_insert_with(|| patient.clone());
        Ok(())
    }

    fn find(&self, patient_id: &str) -> QueueResult<Option<Patient>> {
        Ok(self.patients.read()?.get(patient_id).cloned())
    }
}
