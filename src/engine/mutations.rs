use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_candidate};
use super::{Engine, EngineError, Rejection, ReservationRecord};

impl Engine {
    /// Conflict-checked booking: the front door for new reservations.
    /// `now` is the submission time the start must be strictly after.
    pub async fn reserve(
        &self,
        room_id: RoomId,
        span: Span,
        subject_id: SubjectId,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        validate_candidate(&span, now)?;
        self.insert(room_id, span, subject_id).await
    }

    /// Atomic check-and-insert. Only the ordering of `span` is checked here;
    /// [`reserve`](Self::reserve) adds the submission-time rules.
    pub async fn insert(
        &self,
        room_id: RoomId,
        span: Span,
        subject_id: SubjectId,
    ) -> Result<Reservation, EngineError> {
        if !span.is_valid() {
            return Err(Rejection::InvalidInterval.into());
        }
        let _gate = self.compaction_gate.read().await;
        let schedule = self.schedule_for(room_id);
        let mut guard = schedule.write().await;
        if guard.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        check_no_overlap(&guard, &span)?;

        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            subject_id,
            span,
            created_at: now_ms(),
        };
        self.wal_append(ReservationRecord::Created(reservation.clone()))
            .await?;
        self.reservation_to_room.insert(reservation.id, room_id);
        guard.insert(reservation.clone());

        tracing::debug!(%room_id, id = %reservation.id, "reservation created");
        Ok(reservation)
    }

    /// Explicit cancellation. Returns the removed reservation.
    pub async fn cancel(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let room_id = self
            .room_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let schedule = self.get_schedule(room_id).ok_or(EngineError::NotFound(id))?;
        let mut guard = schedule.write().await;
        // A concurrent cascade may have purged it between lookup and lock.
        if guard.get(id).is_none() {
            return Err(EngineError::NotFound(id));
        }

        self.wal_append(ReservationRecord::Cancelled { id, room_id })
            .await?;
        self.reservation_to_room.remove(&id);
        let removed = guard.remove(id).ok_or(EngineError::NotFound(id))?;

        tracing::debug!(%room_id, %id, "reservation cancelled");
        Ok(removed)
    }

    /// Remove every reservation on `room_id`. Zero is a successful result, so
    /// calling this again for the same room is a no-op.
    pub async fn delete_by_room(&self, room_id: RoomId) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let Some(schedule) = self.get_schedule(room_id) else {
            return Ok(0);
        };
        let mut guard = schedule.write().await;
        if guard.is_empty() {
            return Ok(0);
        }

        self.wal_append(ReservationRecord::RoomPurged { room_id })
            .await?;
        let removed = guard.purge();
        for reservation in &removed {
            self.reservation_to_room.remove(&reservation.id);
        }

        tracing::info!(%room_id, removed = removed.len(), "room reservations purged");
        Ok(removed.len())
    }

    /// Rewrite the WAL as one `Created` record per live reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let schedules: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut records = Vec::with_capacity(self.reservation_to_room.len());
        for schedule in schedules {
            let guard = schedule.read().await;
            records.extend(guard.iter().cloned().map(ReservationRecord::Created));
        }
        let live = records.len();
        self.wal
            .compact(records)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(live, "reservation WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
