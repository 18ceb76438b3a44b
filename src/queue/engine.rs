use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, Utc};
use log::{debug, error, info, warn};
use serde::Deserialize;

use super::lifecycle::{self, CounterEffect, Transition};
use super::types::{new_id, CheckInEntry, CheckInStatus, ClinicDay, LocationProof, NewCheckIn, Priority, QueueStanding};
use super::{estimator, geofence, ordering, snapshot};
use crate::clock::Clock;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, QueueEvent};
use crate::store::{CheckInRepository, Clinic, ClinicCounters, ClinicDirectory, ConditionalUpdate};

const MAX_VISIT_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Timezone whose midnight separates clinic-days
    pub utc_offset: FixedOffset,
    /// Attempts after a conditional update loses a race
    pub claim_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            utc_offset: *Local::now().offset(),
            claim_retries: 5,
        }
    }
}

/// A patient asking to join a clinic's queue
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub clinic_id: String,
    pub patient_id: String,
    pub visit_reason: String,
    #[serde(default)]
    pub priority: Priority,
    pub location: Option<LocationProof>,
}

impl CheckInRequest {
    fn validate(&self) -> QueueResult<()> {
        if self.clinic_id.trim().is_empty() {
            return Err(QueueError::Validation("Clinic ID is required".to_string()));
        }
        if self.patient_id.trim().is_empty() {
            return Err(QueueError::Validation("Patient ID is required".to_string()));
        }
        let reason = self.visit_reason.trim();
        if reason.is_empty() {
            return Err(QueueError::Validation("Visit reason is required".to_string()));
        }
        if reason.chars().count() > MAX_VISIT_REASON_LEN {
            return Err(QueueError::Validation(format!(
                "Visit reason must be at most {} characters",
                MAX_VISIT_REASON_LEN
            )));
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }
}

/// Check-in, call-next, status and position operations over one set of
/// collaborators. Cheap to share behind an `Arc`; all state lives in the
/// repository and the clinic directory.
pub struct QueueEngine {
    checkins: Arc<dyn CheckInRepository>,
    clinics: Arc<dyn ClinicDirectory>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl QueueEngine {
    pub fn new(
        checkins: Arc<dyn CheckInRepository>,
        clinics: Arc<dyn ClinicDirectory>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        QueueEngine { checkins, clinics, events, clock, settings }
    }

    pub fn check_ins(&self) -> &dyn CheckInRepository {
        self.checkins.as_ref()
    }

    pub fn clinics(&self) -> &dyn ClinicDirectory {
        self.clinics.as_ref()
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The clinic-day currently open for `clinic_id`
    pub fn today(&self, clinic_id: &str) -> ClinicDay {
        ClinicDay::containing(clinic_id, self.clock.now(), self.settings.utc_offset)
    }

    /// Lifetime totals and today's active-queue size for a clinic
    pub fn counters(&self, clinic_id: &str) -> QueueResult<ClinicCounters> {
        self.clinics.counters(&self.today(clinic_id))
    }

    fn clinic(&self, clinic_id: &str) -> QueueResult<Clinic> {
        self.clinics
            .get_clinic(clinic_id)?
            .ok_or_else(|| QueueError::ClinicNotFound(clinic_id.to_string()))
    }

    fn active_clinic(&self, clinic_id: &str) -> QueueResult<Clinic> {
        let clinic = self.clinic(clinic_id)?;
        if !clinic.is_active {
            return Err(QueueError::ClinicInactive(clinic_id.to_string()));
        }
        if clinic.avg_wait_minutes == 0 || clinic.max_queue_size == 0 {
            return Err(QueueError::Validation(format!(
                "Clinic {} has no usable capacity or service time configured",
                clinic_id
            )));
        }
        Ok(clinic)
    }

    fn notify(&self, event: QueueEvent) {
        // delivery is best effort, the state change already happened
        if let Err(e) = self.events.publish(&event) {
            warn!("{}", e);
        }
    }

    /// Adds a patient to today's queue of a clinic.
    ///
    /// Capacity is reserved first with an atomic conditional increment on
    /// today's counter; if creating the entry then fails, the reservation is
    /// released so the operation leaves no trace.
    pub fn check_in(&self, request: CheckInRequest) -> QueueResult<CheckInEntry> {
        request.validate()?;
        let clinic = self.active_clinic(request.clinic_id.trim())?;
        let now = self.clock.now();
        let day = ClinicDay::containing(clinic.clinic_id.clone(), now, self.settings.utc_offset);
        let location = geofence::check_location(request.location, clinic.geofence.as_ref());

        self.clinics.increment_active_queue(&day)?;

        let check_in_id = new_id();
        let created = self.checkins.create(&day, &mut |created_for_day, active| {
            let queue_position = ordering::next_position(created_for_day);
            let standing = ordering::rank_on_admission(request.priority.rank(), queue_position, active);
            debug!(
                "Admitting {} to clinic {} at position {} (rank {})",
                check_in_id, clinic.clinic_id, queue_position, standing
            );
            Ok(CheckInEntry::admit(
                check_in_id.clone(),
                NewCheckIn {
                    clinic_id: clinic.clinic_id.clone(),
                    patient_id: request.patient_id.trim().to_string(),
                    visit_reason: request.visit_reason.trim().to_string(),
                    priority: request.priority,
                    queue_position,
                    check_in_time: now,
                    estimated_wait_minutes: estimator::estimate_wait(standing, clinic.avg_wait_minutes),
                    location,
                },
            ))
        });

        let entry = match created {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(undo) = self.clinics.decrement_active_queue(&day) {
                    error!("Could not release queue place for clinic {}: {}", clinic.clinic_id, undo);
                }
                return Err(e);
            }
        };

        if let Err(e) = self.clinics.record_check_in(&clinic.clinic_id) {
            warn!("Check-in total not updated for clinic {}: {}", clinic.clinic_id, e);
        }

        info!(
            "Checked in {} at clinic {}: position {}, priority {}, ~{} min",
            entry.check_in_id, entry.clinic_id, entry.queue_position, entry.priority, entry.estimated_wait_minutes
        );
        self.notify(QueueEvent::QueueChanged {
            clinic_id: entry.clinic_id.clone(),
            check_in_id: entry.check_in_id.clone(),
            queue_position: entry.queue_position,
            priority: entry.priority,
            estimated_wait_minutes: entry.estimated_wait_minutes,
        });
        Ok(entry)
    }

    pub fn find(&self, check_in_id: &str) -> QueueResult<CheckInEntry> {
        self.checkins
            .find_by_id(check_in_id)?
            .ok_or_else(|| QueueError::CheckInNotFound(check_in_id.to_string()))
    }

    /// Applies one transition with optimistic concurrency: read the entry,
    /// then write only if its status is still what was read.
    fn transition(&self, check_in_id: &str, target: CheckInStatus) -> QueueResult<(CheckInEntry, Transition)> {
        for attempt in 0..=self.settings.claim_retries {
            let current = self.find(check_in_id)?;
            let from = current.status();
            if from == target {
                let unchanged = Transition { from, to: target, effect: CounterEffect::default() };
                return Ok((current, unchanged));
            }
            if !lifecycle::is_legal(from, target) {
                return Err(QueueError::InvalidTransition { from, to: target });
            }

            let now = self.clock.now();
            let mut applied = None;
            let outcome = self.checkins.update_status(check_in_id, from, &mut |entry| {
                applied = Some(lifecycle::apply(entry, target, now)?);
                Ok(())
            })?;

            match outcome {
                ConditionalUpdate::Applied(entry) => {
                    let transition = applied
                        .ok_or_else(|| QueueError::Dependency("store skipped the status mutation".to_string()))?;
                    // the status is committed; a counter miss is logged, not undone
                    let day = entry.clinic_day(self.settings.utc_offset);
                    if let Err(e) = self.apply_counter_effect(&day, transition.effect) {
                        error!(
                            "Counters for clinic {} not updated after {} -> {} on {}: {}",
                            day.clinic_id, transition.from, transition.to, entry.check_in_id, e
                        );
                    }
                    return Ok((entry, transition));
                }
                ConditionalUpdate::StatusMismatch(found) => {
                    warn!(
                        "Check-in {} moved to {} while applying {} (attempt {})",
                        check_in_id, found, target, attempt + 1
                    );
                }
            }
        }
        Err(QueueError::AlreadyClaimed(check_in_id.to_string()))
    }

    /// Counter effects land on the entry's own clinic-day, even when it is
    /// finished after midnight.
    fn apply_counter_effect(&self, day: &ClinicDay, effect: CounterEffect) -> QueueResult<()> {
        if effect.leaves_active_queue {
            self.clinics.decrement_active_queue(day)?;
        }
        if effect.served {
            self.clinics.increment_served_count(&day.clinic_id)?;
        }
        Ok(())
    }

    /// Moves a check-in to `target`. Asking for the status it already has is
    /// a no-op and publishes nothing.
    pub fn update_status(&self, check_in_id: &str, target: CheckInStatus) -> QueueResult<CheckInEntry> {
        let (entry, transition) = self.transition(check_in_id, target)?;
        if transition.is_noop() {
            return Ok(entry);
        }
        info!("Check-in {} moved {} -> {}", entry.check_in_id, transition.from, transition.to);
        self.notify(QueueEvent::StatusChanged {
            clinic_id: entry.clinic_id.clone(),
            check_in_id: entry.check_in_id.clone(),
            old_status: transition.from,
            new_status: transition.to,
        });
        Ok(entry)
    }

    /// Cancels a waiting or called check-in. The entry is kept with a
    /// terminal status.
    pub fn cancel(&self, check_in_id: &str) -> QueueResult<()> {
        self.update_status(check_in_id, CheckInStatus::Cancelled).map(|_| ())
    }

    /// Claims the waiting entry that sorts first and marks it called.
    ///
    /// The claim is a conditional update on `waiting`, so two staff members
    /// calling at once get different patients. Losing a race re-selects from
    /// fresh state; after `claim_retries` lost races the call fails with
    /// `AlreadyClaimed`.
    pub fn call_next(&self, clinic_id: &str) -> QueueResult<CheckInEntry> {
        let clinic = self.clinic(clinic_id)?;
        let day = self.today(&clinic.clinic_id);

        for attempt in 0..=self.settings.claim_retries {
            let active = self.checkins.find_active_by_clinic_day(&day)?;
            let next = ordering::select_next(&active)
                .ok_or_else(|| QueueError::EmptyQueue(clinic.clinic_id.clone()))?;
            let check_in_id = next.check_in_id.clone();
            debug!(
                "Next for clinic {}: {} ({}, position {})",
                clinic.clinic_id, check_in_id, next.priority, next.queue_position
            );

            let now = self.clock.now();
            let outcome = self.checkins.update_status(&check_in_id, CheckInStatus::Waiting, &mut |entry| {
                lifecycle::apply(entry, CheckInStatus::Called, now).map(|_| ())
            })?;

            match outcome {
                ConditionalUpdate::Applied(entry) => {
                    info!("Called {} at clinic {}", entry.check_in_id, entry.clinic_id);
                    self.notify(QueueEvent::PatientCalled {
                        clinic_id: entry.clinic_id.clone(),
                        check_in_id: entry.check_in_id.clone(),
                        patient_id: entry.patient_id.clone(),
                        queue_position: entry.queue_position,
                    });
                    return Ok(entry);
                }
                ConditionalUpdate::StatusMismatch(found) => {
                    warn!(
                        "Check-in {} was claimed as {} by another caller (attempt {})",
                        check_in_id, found, attempt + 1
                    );
                }
            }
        }
        Err(QueueError::AlreadyClaimed(clinic.clinic_id))
    }

    /// Live rank and original position of a check-in
    pub fn position_of(&self, check_in_id: &str) -> QueueResult<QueueStanding> {
        let entry = self.find(check_in_id)?;
        let active = self
            .checkins
            .find_active_by_clinic_day(&entry.clinic_day(self.settings.utc_offset))?;
        let current_rank = ordering::rank(&entry, &active);
        let avg_wait = self.clinics.get_clinic(&entry.clinic_id)?.map(|clinic| clinic.avg_wait_minutes);

        Ok(QueueStanding {
            check_in_id: entry.check_in_id.clone(),
            status: entry.status(),
            current_rank,
            original_position: entry.queue_position,
            estimated_wait_minutes: current_rank
                .zip(avg_wait)
                .map(|(rank, avg)| estimator::estimate_wait(rank, avg)),
        })
    }

    /// Today's board for a clinic, rebuilt from its check-ins
    pub fn snapshot(&self, clinic_id: &str) -> QueueResult<snapshot::ClinicQueueSnapshot> {
        let clinic = self.clinic(clinic_id)?;
        self.snapshot_for(&self.today(&clinic.clinic_id))
    }

    pub fn snapshot_for(&self, day: &ClinicDay) -> QueueResult<snapshot::ClinicQueueSnapshot> {
        let entries = self.checkins.find_by_clinic_day(day)?;
        Ok(snapshot::build(day, &entries))
    }
}
