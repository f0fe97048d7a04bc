use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Engine;

/// Optional filters for listing reservations. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<RoomId>,
    pub subject_id: Option<SubjectId>,
    /// Calendar date (UTC) the reservation starts on.
    pub date: Option<NaiveDate>,
}

impl ReservationFilter {
    fn day_span(&self) -> Option<Span> {
        let start = self.date?.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis();
        Some(Span::new(start, start + DAY_MS))
    }

    fn matches(&self, r: &Reservation, day: Option<&Span>) -> bool {
        if let Some(subject) = self.subject_id
            && r.subject_id != subject
        {
            return false;
        }
        if let Some(day) = day
            && !day.contains_instant(r.span.start)
        {
            return false;
        }
        true
    }
}

impl Engine {
    pub async fn get(&self, id: Ulid) -> Option<Reservation> {
        let room_id = self.room_for_reservation(&id)?;
        let schedule = self.get_schedule(room_id)?;
        let guard = schedule.read().await;
        guard.get(id).cloned()
    }

    /// Live reservations on `room_id` whose half-open span overlaps `span`.
    pub async fn find_overlapping(&self, room_id: RoomId, span: &Span) -> Vec<Reservation> {
        let Some(schedule) = self.get_schedule(room_id) else {
            return Vec::new();
        };
        let guard = schedule.read().await;
        guard.overlapping(span).cloned().collect()
    }

    /// Live reservations on `room_id` that intersect the closed range
    /// `range`: a reservation ending exactly at `range.start` is included.
    pub async fn find_in_range(&self, room_id: RoomId, range: &Span) -> Vec<Reservation> {
        let Some(schedule) = self.get_schedule(room_id) else {
            return Vec::new();
        };
        let guard = schedule.read().await;
        guard.touching(range).cloned().collect()
    }

    /// Reservations matching `filter`, ordered by room then start.
    pub async fn list(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let mut schedules: Vec<_> = match filter.room_id {
            Some(room_id) => self.get_schedule(room_id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let day = filter.day_span();
        let mut out = Vec::new();
        for schedule in schedules.drain(..) {
            let guard = schedule.read().await;
            out.extend(
                guard
                    .iter()
                    .filter(|r| filter.matches(r, day.as_ref()))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.room_id, r.span.start));
        out
    }

    pub async fn room_reservation_count(&self, room_id: RoomId) -> usize {
        match self.get_schedule(room_id) {
            Some(schedule) => schedule.read().await.len(),
            None => 0,
        }
    }
}
