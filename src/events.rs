//! Queue change notifications.
//!
//! The engine publishes a [`QueueEvent`] after every committed change. Sinks
//! are fire-and-forget: a failing sink is logged by the engine and never
//! undoes the change. [`RecentEvents`] backs the polling endpoint; a push
//! transport would implement [`EventSink`] the same way.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::queue::{CheckInStatus, Priority};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum QueueEvent {
    QueueChanged {
        clinic_id: String,
        check_in_id: String,
        queue_position: u32,
        priority: Priority,
        estimated_wait_minutes: u32,
    },
    StatusChanged {
        clinic_id: String,
        check_in_id: String,
        old_status: CheckInStatus,
        new_status: CheckInStatus,
    },
    PatientCalled {
        clinic_id: String,
        check_in_id: String,
        patient_id: String,
        queue_position: u32,
    },
}

impl QueueEvent {
    pub fn clinic_id(&self) -> &str {
        match self {
            QueueEvent::QueueChanged { clinic_id, .. }
            | QueueEvent::StatusChanged { clinic_id, .. }
            | QueueEvent::PatientCalled { clinic_id, .. } => clinic_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::QueueChanged { .. } => "queue-changed",
            QueueEvent::StatusChanged { .. } => "status-changed",
            QueueEvent::PatientCalled { .. } => "patient-called",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to publish {kind} for clinic {clinic_id}: {reason}")]
pub struct PublishError {
    pub clinic_id: String,
    pub kind: &'static str,
    pub reason: String,
}

impl PublishError {
    pub fn new(event: &QueueEvent, reason: impl Into<String>) -> Self {
        PublishError {
            clinic_id: event.clinic_id().to_string(),
            kind: event.kind(),
            reason: reason.into(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: &QueueEvent) -> Result<(), PublishError>;
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        info!("[clinic {}] {} {:?}", event.clinic_id(), event.kind(), event);
        Ok(())
    }
}

/// Publishes to every member. All members are tried; the first failure is
/// reported after the rest have run.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        FanoutSink { sinks }
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub event: QueueEvent,
}

#[derive(Default)]
struct ClinicFeed {
    next_sequence: u64,
    events: VecDeque<RecordedEvent>,
}

/// Keeps the most recent events per clinic for polling clients
pub struct RecentEvents {
    capacity: usize,
    feeds: Mutex<HashMap<String, ClinicFeed>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        RecentEvents {
            capacity: capacity.max(1),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    /// Events for `clinic_id` with a sequence number greater than `since`
    pub fn since(&self, clinic_id: &str, since: u64) -> Vec<RecordedEvent> {
        let feeds = match self.feeds.lock() {
            Ok(feeds) => feeds,
            Err(poisoned) => poisoned.into_inner(),
        };
        feeds
            .get(clinic_id)
            .map(|feed| feed.events.iter().filter(|e| e.sequence > since).cloned().collect())
            .unwrap_or_default()
    }
}

impl EventSink for RecentEvents {
    fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        let mut feeds = self
            .feeds
            .lock()
            .map_err(|e| PublishError::new(event, e.to_string()))?;
        let feed = feeds.entry(event.clinic_id().to_string()).or_default();
        feed.next_sequence += 1;
        feed.events.push_back(RecordedEvent {
            sequence: feed.next_sequence,
            published_at: Utc::now(),
            event: event.clone(),
        });
        while feed.events.len() > self.capacity {
            feed.events.pop_front();
        }
        Ok(())
    }
}
