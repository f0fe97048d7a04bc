use ulid::Ulid;

use crate::model::*;

/// All live reservations on one room, sorted by `span.start`.
///
/// The no-overlap invariant means sorted-by-start is also sorted-by-end,
/// which is what makes the binary searches below valid.
#[derive(Debug, Clone)]
pub struct RoomSchedule {
    pub room_id: RoomId,
    reservations: Vec<Reservation>,
}

impl RoomSchedule {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            reservations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.iter()
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Drop every reservation, returning what was removed.
    pub fn purge(&mut self) -> Vec<Reservation> {
        std::mem::take(&mut self.reservations)
    }

    /// Reservations whose half-open span overlaps `query`.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Like [`overlapping`](Self::overlapping) but a reservation ending
    /// exactly at `window.start` still counts. Both ends of a calendar
    /// range are inclusive.
    pub fn touching(&self, window: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < window.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end >= window.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: 1,
            subject_id: 10,
            span: Span::new(start, end),
            created_at: 0,
        }
    }

    fn schedule(spans: &[(Ms, Ms)]) -> RoomSchedule {
        let mut s = RoomSchedule::new(1);
        for &(a, b) in spans {
            s.insert(res(a, b));
        }
        s
    }

    #[test]
    fn insert_keeps_start_order() {
        let s = schedule(&[(300, 400), (100, 200), (200, 300)]);
        let starts: Vec<Ms> = s.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut s = RoomSchedule::new(1);
        let rs: Vec<Reservation> = (0..3).map(|i| res(i * 100, i * 100 + 50)).collect();
        for r in &rs {
            s.insert(r.clone());
        }
        assert_eq!(s.remove(rs[1].id), Some(rs[1].clone()));
        let ids: Vec<Ulid> = s.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![rs[0].id, rs[2].id]);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut s = schedule(&[(100, 200)]);
        assert!(s.remove(Ulid::new()).is_none());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let s = schedule(&[(100, 200), (450, 600), (1000, 1100)]);
        let hits: Vec<_> = s.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let s = schedule(&[(100, 200), (300, 400)]);
        assert_eq!(s.overlapping(&Span::new(200, 300)).count(), 0);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let s = schedule(&[(100, 201)]);
        assert_eq!(s.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn overlapping_large_reservation_spanning_query() {
        let s = schedule(&[(0, 10_000)]);
        assert_eq!(s.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn touching_includes_reservation_ending_at_window_start() {
        let s = schedule(&[(100, 200), (300, 400)]);
        let hits: Vec<_> = s.touching(&Span::new(200, 300)).map(|r| r.span).collect();
        assert_eq!(hits, vec![Span::new(100, 200)]);
    }

    #[test]
    fn purge_empties_schedule() {
        let mut s = schedule(&[(100, 200), (300, 400)]);
        assert_eq!(s.purge().len(), 2);
        assert!(s.is_empty());
        assert!(s.purge().is_empty());
    }
}
