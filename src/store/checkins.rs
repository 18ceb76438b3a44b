use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{CheckInRepository, ConditionalUpdate, EntryBuilder, EntryMutation};
use crate::error::{QueueError, QueueResult};
use crate::queue::{CheckInEntry, CheckInStatus, ClinicDay};

type DayBook = Arc<Mutex<Vec<CheckInEntry>>>;

/// In-memory check-in store, locked per clinic-day
#[derive(Default)]
pub struct MemoryCheckIns {
    days: Mutex<HashMap<ClinicDay, DayBook>>,
    // check-in id -> the clinic-day holding it
    index: RwLock<HashMap<String, ClinicDay>>,
}

impl MemoryCheckIns {
    pub fn new() -> Self {
        Self::default()
    }

    fn day_book(&self, day: &ClinicDay) -> QueueResult<DayBook> {
        let mut days = self.days.lock()?;
        Ok(days.entry(day.clone()).or_default().clone())
    }

    fn existing_book(&self, day: &ClinicDay) -> QueueResult<Option<DayBook>> {
        Ok(self.days.lock()?.get(day).cloned())
    }

    fn books_where(&self, keep: impl Fn(&ClinicDay) -> bool) -> QueueResult<Vec<DayBook>> {
        Ok(self
            .days
            .lock()?
            .iter()
            .filter(|(day, _)| keep(day))
            .map(|(_, book)| book.clone())
            .collect())
    }

    fn locate(&self, check_in_id: &str) -> QueueResult<Option<DayBook>> {
        let day = match self.index.read()?.get(check_in_id) {
            Some(day) => day.clone(),
            None => return Ok(None),
        };
        self.existing_book(&day)
    }
}

impl CheckInRepository for MemoryCheckIns {
    fn create(&self, day: &ClinicDay, build: &mut EntryBuilder<'_>) -> QueueResult<CheckInEntry> {
        let book = self.day_book(day)?;
        let mut entries = book.lock()?;

        let active: Vec<CheckInEntry> = entries
            .iter()
            .filter(|entry| entry.status().is_active())
            .cloned()
            .collect();
        let entry = build(entries.len(), &active)?;

        if entry.clinic_id != day.clinic_id {
            return Err(QueueError::Validation(format!(
                "Check-in for clinic {} cannot be filed under clinic {}",
                entry.clinic_id, day.clinic_id
            )));
        }

        self.index.write()?.insert(entry.check_in_id.clone(), day.clone());
        entries.push(entry.clone());
        Ok(entry)
    }

    fn find_by_id(&self, check_in_id: &str) -> QueueResult<Option<CheckInEntry>> {
        let Some(book) = self.locate(check_in_id)? else {
            return Ok(None);
        };
        let entries = book.lock()?;
        Ok(entries.iter().find(|entry| entry.check_in_id == check_in_id).cloned())
    }

    fn find_by_clinic_day(&self, day: &ClinicDay) -> QueueResult<Vec<CheckInEntry>> {
        match self.existing_book(day)? {
            Some(book) => Ok(book.lock()?.clone()),
            None => Ok(Vec::new()),
        }
    }

    fn find_by_clinic(&self, clinic_id: &str) -> QueueResult<Vec<CheckInEntry>> {
        let mut found = Vec::new();
        for book in self.books_where(|day| day.clinic_id == clinic_id)? {
            found.extend(book.lock()?.iter().cloned());
        }
        found.sort_by_key(|entry| entry.check_in_time);
        Ok(found)
    }

    fn find_by_patient(&self, patient_id: &str) -> QueueResult<Vec<CheckInEntry>> {
        let mut found = Vec::new();
        for book in self.books_where(|_| true)? {
            found.extend(book.lock()?.iter().filter(|entry| entry.patient_id == patient_id).cloned());
        }
        found.sort_by_key(|entry| entry.check_in_time);
        Ok(found)
    }

    fn update_status(
        &self,
        check_in_id: &str,
        expected: CheckInStatus,
        mutate: &mut EntryMutation<'_>,
    ) -> QueueResult<ConditionalUpdate> {
        let book = self
            .locate(check_in_id)?
            .ok_or_else(|| QueueError::CheckInNotFound(check_in_id.to_string()))?;
        let mut entries = book.lock()?;
        let stored = entries
            .iter_mut()
            .find(|entry| entry.check_in_id == check_in_id)
            .ok_or_else(|| QueueError::CheckInNotFound(check_in_id.to_string()))?;

        if stored.status() != expected {
            return Ok(ConditionalUpdate::StatusMismatch(stored.status()));
        }

        // work on a copy so a failed mutation leaves the stored entry as it was
        let mut updated = stored.clone();
        mutate(&mut updated)?;
        *stored = updated.clone();
        Ok(ConditionalUpdate::Applied(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{lifecycle, NewCheckIn, Priority};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn day() -> ClinicDay {
        ClinicDay::new("c1", t0().date_naive())
    }

    fn file(store: &MemoryCheckIns, id: &str) -> CheckInEntry {
        store
            .create(&day(), &mut |created, _active| {
                Ok(CheckInEntry::admit(
                    id.to_string(),
                    NewCheckIn {
                        clinic_id: "c1".into(),
                        patient_id: "p1".into(),
                        visit_reason: "rash".into(),
                        priority: Priority::Normal,
                        queue_position: created as u32 + 1,
                        check_in_time: t0(),
                        estimated_wait_minutes: 15,
                        location: None,
                    },
                ))
            })
            .unwrap()
    }

    #[test]
    fn create_sees_created_count_and_indexes_by_id() {
        let store = MemoryCheckIns::new();
        assert_eq!(file(&store, "a").queue_position, 1);
        assert_eq!(file(&store, "b").queue_position, 2);
        assert_eq!(store.find_by_id("b").unwrap().unwrap().queue_position, 2);
        assert!(store.find_by_id("zzz").unwrap().is_none());
        assert_eq!(store.count_active_by_clinic_day(&day()).unwrap(), 2);
    }

    #[test]
    fn update_is_guarded_by_expected_status() {
        let store = MemoryCheckIns::new();
        file(&store, "a");
        let now = t0();

        let first = store
            .update_status("a", CheckInStatus::Waiting, &mut |entry| {
                lifecycle::apply(entry, CheckInStatus::Called, now).map(|_| ())
            })
            .unwrap();
        assert!(matches!(first, ConditionalUpdate::Applied(ref e) if e.status() == CheckInStatus::Called));

        let second = store
            .update_status("a", CheckInStatus::Waiting, &mut |entry| {
                lifecycle::apply(entry, CheckInStatus::Called, now).map(|_| ())
            })
            .unwrap();
        assert_eq!(second, ConditionalUpdate::StatusMismatch(CheckInStatus::Called));
    }

    #[test]
    fn failed_mutation_leaves_entry_untouched() {
        let store = MemoryCheckIns::new();
        file(&store, "a");
        let result = store.update_status("a", CheckInStatus::Waiting, &mut |entry| {
            lifecycle::apply(entry, CheckInStatus::Completed, t0()).map(|_| ())
        });
        assert!(matches!(result, Err(QueueError::InvalidTransition { .. })));
        assert_eq!(store.find_by_id("a").unwrap().unwrap().status(), CheckInStatus::Waiting);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let store = MemoryCheckIns::new();
        let result = store.update_status("nope", CheckInStatus::Waiting, &mut |_| Ok(()));
        assert_eq!(result, Err(QueueError::CheckInNotFound("nope".into())));
    }
}
