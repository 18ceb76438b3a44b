use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use clinic_queue::clock::{Clock, ManualClock};
use clinic_queue::events::{EventSink, FanoutSink, PublishError, QueueEvent, RecentEvents};
use clinic_queue::queue::{
    CheckInRequest, CheckInStatus, ClinicDay, EngineSettings, Geofence, LocationProof, Priority, QueueEngine,
};
use clinic_queue::store::{
    CheckInRepository, Clinic, ClinicCounters, ClinicDirectory, MemoryCheckIns, MemoryClinicDirectory,
};
use clinic_queue::{ErrorKind, QueueError};

const CLINIC: &str = "riverside";

struct Harness {
    engine: QueueEngine,
    clock: Arc<ManualClock>,
    clinics: Arc<MemoryClinicDirectory>,
    events: Arc<RecentEvents>,
}

fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

fn clinic(max_queue_size: u32, avg_wait_minutes: u32) -> Clinic {
    Clinic {
        clinic_id: CLINIC.to_string(),
        name: "Riverside Walk-In".to_string(),
        is_active: true,
        max_queue_size,
        avg_wait_minutes,
        geofence: None,
    }
}

fn harness_with(clinic: Clinic, extra_sinks: Vec<Arc<dyn EventSink>>) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let clock = Arc::new(ManualClock::new(opening()));
    let clinics = Arc::new(MemoryClinicDirectory::new([clinic]));
    let events = Arc::new(RecentEvents::new(500));
    let mut sinks = extra_sinks;
    sinks.push(events.clone());

    let engine = QueueEngine::new(
        Arc::new(MemoryCheckIns::new()),
        clinics.clone(),
        Arc::new(FanoutSink::new(sinks)),
        clock.clone(),
        EngineSettings {
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            claim_retries: 64,
        },
    );
    Harness { engine, clock, clinics, events }
}

fn harness(max_queue_size: u32, avg_wait_minutes: u32) -> Harness {
    harness_with(clinic(max_queue_size, avg_wait_minutes), Vec::new())
}

fn request(patient: &str, priority: Priority) -> CheckInRequest {
    CheckInRequest {
        clinic_id: CLINIC.to_string(),
        patient_id: patient.to_string(),
        visit_reason: "Fever".to_string(),
        priority,
        location: None,
    }
}

impl Harness {
    fn active_queue_size(&self) -> u32 {
        self.engine.counters(CLINIC).unwrap().current_queue_size
    }

    fn active_entries(&self) -> usize {
        self.engine
            .check_ins()
            .count_active_by_clinic_day(&self.engine.today(CLINIC))
            .unwrap()
    }

    fn event_kinds(&self) -> Vec<&'static str> {
        self.events.since(CLINIC, 0).iter().map(|e| e.event.kind()).collect()
    }
}

#[test]
fn positions_and_estimates_grow_with_the_line() {
    let h = harness(10, 15);
    let p1 = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    let p2 = h.engine.check_in(request("p2", Priority::Normal)).unwrap();

    assert_eq!((p1.queue_position, p1.estimated_wait_minutes), (1, 15));
    assert_eq!((p2.queue_position, p2.estimated_wait_minutes), (2, 30));
    assert_eq!(p1.status(), CheckInStatus::Waiting);
    assert_eq!(h.event_kinds(), vec!["queue-changed", "queue-changed"]);
}

#[test]
fn emergency_is_called_before_earlier_normal() {
    let h = harness(10, 15);
    h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    let p2 = h.engine.check_in(request("p2", Priority::Emergency)).unwrap();

    let called = h.engine.call_next(CLINIC).unwrap();
    assert_eq!(called.check_in_id, p2.check_in_id);
    assert_eq!(called.status(), CheckInStatus::Called);
    assert_eq!(called.called_time(), Some(opening()));
    assert_eq!(h.event_kinds().last(), Some(&"patient-called"));
}

#[test]
fn second_check_in_at_capacity_is_rejected() {
    let h = harness(1, 15);
    h.engine.check_in(request("p1", Priority::Normal)).unwrap();

    let err = h.engine.check_in(request("p2", Priority::Emergency)).unwrap_err();
    assert!(matches!(err, QueueError::QueueFull { max_queue_size: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let counters = h.engine.counters(CLINIC).unwrap();
    assert_eq!(counters.current_queue_size, 1);
    assert_eq!(counters.total_check_ins, 1);
    assert_eq!(h.engine.snapshot(CLINIC).unwrap().checked_in_today, 1);
}

#[test]
fn full_lifecycle_and_illegal_shortcut() {
    let h = harness(10, 15);
    let entry = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    let id = entry.check_in_id.clone();

    h.clock.advance(Duration::minutes(10));
    h.engine.update_status(&id, CheckInStatus::Called).unwrap();
    h.clock.advance(Duration::seconds(7 * 60 + 29));
    let started = h.engine.update_status(&id, CheckInStatus::InService).unwrap();
    assert_eq!(started.actual_wait_minutes(), Some(17));
    h.clock.advance(Duration::minutes(20));
    let done = h.engine.update_status(&id, CheckInStatus::Completed).unwrap();

    assert_eq!(done.status(), CheckInStatus::Completed);
    assert_eq!(done.service_end_time(), Some(h.clock.now()));
    let counters = h.engine.counters(CLINIC).unwrap();
    assert_eq!(counters.current_queue_size, 0);
    assert_eq!(counters.total_patients_served, 1);

    let fresh = h.engine.check_in(request("p2", Priority::Normal)).unwrap();
    let err = h.engine.update_status(&fresh.check_in_id, CheckInStatus::Completed).unwrap_err();
    assert_eq!(
        err,
        QueueError::InvalidTransition { from: CheckInStatus::Waiting, to: CheckInStatus::Completed }
    );
    assert_eq!(h.engine.find(&fresh.check_in_id).unwrap().status(), CheckInStatus::Waiting);
}

#[test]
fn cancelled_entry_is_final() {
    let h = harness(10, 15);
    let keep = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    let entry = h.engine.check_in(request("p2", Priority::Normal)).unwrap();
    assert_eq!(h.active_queue_size(), 2);

    h.engine.cancel(&entry.check_in_id).unwrap();
    assert_eq!(h.active_queue_size(), 1);
    assert_eq!(h.engine.find(&entry.check_in_id).unwrap().status(), CheckInStatus::Cancelled);

    for target in CheckInStatus::ALL.into_iter().filter(|s| *s != CheckInStatus::Cancelled) {
        let err = h.engine.update_status(&entry.check_in_id, target).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict, "cancelled -> {} must fail", target);
    }
    assert_eq!(h.active_queue_size(), 1);

    // the other patient is untouched and now first in line
    assert_eq!(h.engine.position_of(&keep.check_in_id).unwrap().current_rank, Some(1));
}

#[test]
fn repeating_a_status_changes_nothing() {
    let h = harness(10, 15);
    let id = h.engine.check_in(request("p1", Priority::Normal)).unwrap().check_in_id;
    h.engine.call_next(CLINIC).unwrap();
    h.engine.update_status(&id, CheckInStatus::InService).unwrap();
    let done = h.engine.update_status(&id, CheckInStatus::Completed).unwrap();
    let events_before = h.event_kinds().len();

    h.clock.advance(Duration::hours(1));
    let again = h.engine.update_status(&id, CheckInStatus::Completed).unwrap();

    assert_eq!(again, done);
    assert_eq!(h.engine.counters(CLINIC).unwrap().total_patients_served, 1);
    assert_eq!(h.active_queue_size(), 0);
    assert_eq!(h.event_kinds().len(), events_before);
}

#[test]
fn counter_tracks_active_entries_through_a_busy_morning() {
    let h = harness(50, 10);
    let ids: Vec<String> = (0..8)
        .map(|i| {
            let priority = Priority::ALL[i % Priority::ALL.len()];
            h.engine.check_in(request(&format!("p{}", i), priority)).unwrap().check_in_id
        })
        .collect();
    assert_eq!(h.active_queue_size() as usize, h.active_entries());

    let first = h.engine.call_next(CLINIC).unwrap();
    h.engine.update_status(&first.check_in_id, CheckInStatus::InService).unwrap();
    assert_eq!(h.active_queue_size() as usize, h.active_entries());

    let second = h.engine.call_next(CLINIC).unwrap();
    h.engine.update_status(&second.check_in_id, CheckInStatus::NoShow).unwrap();
    h.engine.update_status(&first.check_in_id, CheckInStatus::Completed).unwrap();
    h.engine.cancel(&ids[0]).ok();
    h.engine.cancel(&ids[1]).ok();

    assert_eq!(h.active_queue_size() as usize, h.active_entries());
    let snapshot = h.engine.snapshot(CLINIC).unwrap();
    assert_eq!(snapshot.queue_size, h.active_entries());
    assert_eq!(snapshot.served_today, 1);
    assert_eq!(snapshot.checked_in_today, 8);
}

#[test]
fn rank_follows_the_calling_order() {
    let h = harness(10, 15);
    let low = h.engine.check_in(request("p1", Priority::Low)).unwrap();
    let normal = h.engine.check_in(request("p2", Priority::Normal)).unwrap();
    let high = h.engine.check_in(request("p3", Priority::High)).unwrap();

    // admitted third, but ahead of both earlier arrivals
    assert_eq!(high.estimated_wait_minutes, 15);

    let rank_of = |id: &str| h.engine.position_of(id).unwrap();
    assert_eq!(rank_of(&high.check_in_id).current_rank, Some(1));
    assert_eq!(rank_of(&normal.check_in_id).current_rank, Some(2));
    let standing = rank_of(&low.check_in_id);
    assert_eq!(standing.current_rank, Some(3));
    assert_eq!(standing.original_position, 1);
    assert_eq!(standing.estimated_wait_minutes, Some(45));

    let called = h.engine.call_next(CLINIC).unwrap();
    assert_eq!(called.check_in_id, high.check_in_id);
    h.engine.update_status(&called.check_in_id, CheckInStatus::InService).unwrap();

    let serving = rank_of(&high.check_in_id);
    assert_eq!(serving.current_rank, None);
    assert_eq!(serving.estimated_wait_minutes, None);
    assert_eq!(rank_of(&low.check_in_id).current_rank, Some(2));
}

#[test]
fn concurrent_check_ins_get_distinct_consecutive_positions() {
    let h = harness(100, 15);
    h.engine.check_in(request("early", Priority::Normal)).unwrap();

    let engine = &h.engine;
    let positions: Vec<u32> = thread::scope(|scope| {
        let handles: Vec<_> = (0..40)
            .map(|i| scope.spawn(move || engine.check_in(request(&format!("p{}", i), Priority::Normal))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap().queue_position).collect()
    });

    let distinct: HashSet<u32> = positions.iter().copied().collect();
    assert_eq!(distinct.len(), 40);
    assert_eq!(distinct, (2..=41).collect::<HashSet<u32>>());
    assert_eq!(h.active_queue_size(), 41);
}

#[test]
fn concurrent_check_ins_never_pass_capacity() {
    let h = harness(5, 15);
    let engine = &h.engine;
    let results: Vec<Result<_, QueueError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..20)
            .map(|i| scope.spawn(move || engine.check_in(request(&format!("p{}", i), Priority::High))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 5);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, QueueError::QueueFull { .. })));
    assert_eq!(h.active_queue_size(), 5);
    assert_eq!(h.active_entries(), 5);
}

#[test]
fn concurrent_callers_never_share_a_patient() {
    let h = harness(50, 15);
    for i in 0..10 {
        h.engine.check_in(request(&format!("p{}", i), Priority::ALL[i % 4])).unwrap();
    }

    let engine = &h.engine;
    let called: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..10).map(|_| scope.spawn(move || engine.call_next(CLINIC))).collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap().check_in_id).collect()
    });

    let distinct: HashSet<&String> = called.iter().collect();
    assert_eq!(distinct.len(), 10);
    for id in &called {
        assert_eq!(h.engine.find(id).unwrap().status(), CheckInStatus::Called);
    }
    assert!(matches!(h.engine.call_next(CLINIC), Err(QueueError::EmptyQueue(_))));
}

struct Unreachable;

impl EventSink for Unreachable {
    fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        Err(PublishError::new(event, "subscriber gone"))
    }
}

#[test]
fn failed_notification_keeps_the_change() {
    let h = harness_with(clinic(10, 15), vec![Arc::new(Unreachable)]);
    let entry = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    h.engine.call_next(CLINIC).unwrap();

    assert_eq!(h.engine.find(&entry.check_in_id).unwrap().status(), CheckInStatus::Called);
    assert_eq!(h.event_kinds(), vec!["queue-changed", "patient-called"]);
}

#[test]
fn status_events_carry_old_and_new_status() {
    let h = harness(10, 15);
    let entry = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    h.engine.cancel(&entry.check_in_id).unwrap();

    let last = h.events.since(CLINIC, 0).pop().unwrap();
    assert_eq!(
        last.event,
        QueueEvent::StatusChanged {
            clinic_id: CLINIC.to_string(),
            check_in_id: entry.check_in_id,
            old_status: CheckInStatus::Waiting,
            new_status: CheckInStatus::Cancelled,
        }
    );
}

#[test]
fn unknown_inactive_and_malformed_requests_leave_no_trace() {
    let h = harness(10, 15);

    let mut unknown = request("p1", Priority::Normal);
    unknown.clinic_id = "nowhere".to_string();
    assert!(matches!(h.engine.check_in(unknown), Err(QueueError::ClinicNotFound(_))));

    let mut blank = request("p1", Priority::Normal);
    blank.visit_reason = "   ".to_string();
    assert_eq!(h.engine.check_in(blank).unwrap_err().kind(), ErrorKind::Validation);

    let mut far_north = request("p1", Priority::Normal);
    far_north.location = Some(LocationProof { latitude: 91.0, longitude: 0.0, accuracy: None });
    assert_eq!(h.engine.check_in(far_north).unwrap_err().kind(), ErrorKind::Validation);

    h.clinics.set_active(CLINIC, false).unwrap();
    assert!(matches!(
        h.engine.check_in(request("p1", Priority::Normal)),
        Err(QueueError::ClinicInactive(_))
    ));

    let counters = h.engine.counters(CLINIC).unwrap();
    assert_eq!((counters.current_queue_size, counters.total_check_ins), (0, 0));
    assert!(h.events.since(CLINIC, 0).is_empty());
    assert!(matches!(h.engine.find("missing"), Err(QueueError::CheckInNotFound(_))));
}

#[test]
fn location_outside_geofence_is_flagged_not_refused() {
    let mut fenced = clinic(10, 15);
    fenced.geofence = Some(Geofence { latitude: 40.7128, longitude: -74.0060, radius_m: 500.0 });
    let h = harness_with(fenced, Vec::new());

    let mut near = request("p1", Priority::Normal);
    near.location = Some(LocationProof { latitude: 40.7130, longitude: -74.0062, accuracy: Some(5.0) });
    let near = h.engine.check_in(near).unwrap();
    assert!(near.location.unwrap().verified);

    let mut far = request("p2", Priority::Normal);
    far.location = Some(LocationProof { latitude: 40.7589, longitude: -73.9851, accuracy: None });
    let far = h.engine.check_in(far).unwrap();
    let check = far.location.unwrap();
    assert!(!check.verified);
    assert!(check.distance_from_clinic_m.unwrap() > 500.0);
}

#[test]
fn positions_and_capacity_restart_on_a_new_clinic_day() {
    let h = harness(2, 15);
    h.clock.set(Utc.with_ymd_and_hms(2026, 3, 10, 17, 0, 0).unwrap());
    let yesterday = h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    h.engine.check_in(request("p2", Priority::Normal)).unwrap();
    assert!(matches!(
        h.engine.check_in(request("p3", Priority::Normal)),
        Err(QueueError::QueueFull { .. })
    ));

    // left waiting overnight; the morning opens with an empty line
    h.clock.advance(Duration::hours(16));
    assert_eq!(h.active_queue_size(), 0);
    assert_eq!(h.active_entries(), 0);
    assert!(matches!(h.engine.call_next(CLINIC), Err(QueueError::EmptyQueue(_))));

    let today = h.engine.check_in(request("p3", Priority::Normal)).unwrap();
    assert_eq!(today.queue_position, 1);
    assert_eq!(h.active_queue_size(), 1);
    assert_eq!(h.active_queue_size() as usize, h.active_entries());
    assert_eq!(h.engine.snapshot(CLINIC).unwrap().checked_in_today, 1);
    assert_eq!(h.engine.call_next(CLINIC).unwrap().check_in_id, today.check_in_id);

    // yesterday's line still ranks within its own day
    assert_eq!(h.engine.position_of(&yesterday.check_in_id).unwrap().current_rank, Some(1));

    // closing out a leftover frees yesterday's place, not today's
    h.engine.cancel(&yesterday.check_in_id).unwrap();
    assert_eq!(h.active_queue_size(), 1);
    h.engine.check_in(request("p4", Priority::Normal)).unwrap();
    assert_eq!(h.active_queue_size() as usize, h.active_entries());
    assert!(matches!(
        h.engine.check_in(request("p5", Priority::Normal)),
        Err(QueueError::QueueFull { max_queue_size: 2, .. })
    ));
    assert_eq!(h.engine.counters(CLINIC).unwrap().total_check_ins, 4);
}

/// Directory whose counter writes fail after admission
struct CountersOffline(MemoryClinicDirectory);

impl ClinicDirectory for CountersOffline {
    fn get_clinic(&self, clinic_id: &str) -> Result<Option<Clinic>, QueueError> {
        self.0.get_clinic(clinic_id)
    }

    fn list_active(&self) -> Result<Vec<Clinic>, QueueError> {
        self.0.list_active()
    }

    fn increment_active_queue(&self, day: &ClinicDay) -> Result<u32, QueueError> {
        self.0.increment_active_queue(day)
    }

    fn decrement_active_queue(&self, _day: &ClinicDay) -> Result<u32, QueueError> {
        Err(QueueError::Dependency("counter store offline".to_string()))
    }

    fn record_check_in(&self, clinic_id: &str) -> Result<u64, QueueError> {
        self.0.record_check_in(clinic_id)
    }

    fn increment_served_count(&self, _clinic_id: &str) -> Result<u64, QueueError> {
        Err(QueueError::Dependency("counter store offline".to_string()))
    }

    fn counters(&self, day: &ClinicDay) -> Result<ClinicCounters, QueueError> {
        self.0.counters(day)
    }
}

#[test]
fn committed_status_change_survives_a_counter_failure() {
    let _ = env_logger::builder().is_test(true).try_init();
    let events = Arc::new(RecentEvents::new(50));
    let engine = QueueEngine::new(
        Arc::new(MemoryCheckIns::new()),
        Arc::new(CountersOffline(MemoryClinicDirectory::new([clinic(10, 15)]))),
        events.clone(),
        Arc::new(ManualClock::new(opening())),
        EngineSettings {
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            claim_retries: 3,
        },
    );

    let entry = engine.check_in(request("p1", Priority::Normal)).unwrap();
    engine.call_next(CLINIC).unwrap();
    engine.update_status(&entry.check_in_id, CheckInStatus::InService).unwrap();
    let done = engine.update_status(&entry.check_in_id, CheckInStatus::Completed).unwrap();

    assert_eq!(done.status(), CheckInStatus::Completed);
    assert_eq!(engine.find(&entry.check_in_id).unwrap().status(), CheckInStatus::Completed);
    let last = events.since(CLINIC, 0).pop().unwrap();
    assert_eq!(
        last.event,
        QueueEvent::StatusChanged {
            clinic_id: CLINIC.to_string(),
            check_in_id: entry.check_in_id,
            old_status: CheckInStatus::InService,
            new_status: CheckInStatus::Completed,
        }
    );
}

#[test]
fn empty_queue_and_unknown_clinic_on_call_next() {
    let h = harness(10, 15);
    assert!(matches!(h.engine.call_next(CLINIC), Err(QueueError::EmptyQueue(_))));
    assert!(matches!(h.engine.call_next("nowhere"), Err(QueueError::ClinicNotFound(_))));

    // a called patient is no longer "next"
    h.engine.check_in(request("p1", Priority::Normal)).unwrap();
    h.engine.call_next(CLINIC).unwrap();
    assert_eq!(h.engine.call_next(CLINIC).unwrap_err().kind(), ErrorKind::NotFound);
}
