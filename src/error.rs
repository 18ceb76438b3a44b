use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::queue::CheckInStatus;

/// Broad classes of failure a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed or missing input; retrying the same request will not help
    Validation,
    NotFound,
    /// Capacity, transition or claim conflict; retry with fresh state
    Conflict,
    /// Backing store unavailable
    Dependency,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Clinic {0} not found")]
    ClinicNotFound(String),
    #[error("Clinic {0} is not accepting check-ins")]
    ClinicInactive(String),
    #[error("Check-in {0} not found")]
    CheckInNotFound(String),
    #[error("Patient {0} not found")]
    PatientNotFound(String),
    #[error("No patients waiting in the queue for clinic {0}")]
    EmptyQueue(String),
    #[error("Queue is full for clinic {clinic_id} (max {max_queue_size}). Please try again later.")]
    QueueFull { clinic_id: String, max_queue_size: u32 },
    #[error("Cannot move a check-in from {from} to {to}")]
    InvalidTransition { from: CheckInStatus, to: CheckInStatus },
    #[error("Check-in {0} was claimed by another caller")]
    AlreadyClaimed(String),
    #[error("Store unavailable: {0}")]
    Dependency(String),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Validation(_) => ErrorKind::Validation,
            QueueError::ClinicNotFound(_)
            | QueueError::ClinicInactive(_)
            | QueueError::CheckInNotFound(_)
            | QueueError::PatientNotFound(_)
            | QueueError::EmptyQueue(_) => ErrorKind::NotFound,
            QueueError::QueueFull { .. }
            | QueueError::InvalidTransition { .. }
            | QueueError::AlreadyClaimed(_) => ErrorKind::Conflict,
            QueueError::Dependency(_) => ErrorKind::Dependency,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        QueueError::Dependency(format!("lock poisoned: {}", err))
    }
}

impl From<csv::Error> for QueueError {
    fn from(err: csv::Error) -> Self {
        QueueError::Dependency(format!("CSV error: {}", err))
    }
}

impl ResponseError for QueueError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Dependency => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "success": false,
            "kind": self.kind(),
            "error": self.to_string(),
        }))
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
