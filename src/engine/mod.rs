mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod schedule;
#[cfg(test)]
mod tests;

pub use availability::{merge_overlapping, subtract_intervals, Availability, DateRange, RangeError};
pub use conflict::{check_no_overlap, validate_candidate};
pub use error::{EngineError, Rejection};
pub use queries::ReservationFilter;
pub use schedule::RoomSchedule;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::wal::{Wal, WalWriter};

pub type SharedSchedule = Arc<RwLock<RoomSchedule>>;

/// WAL record format for the reservation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationRecord {
    Created(Reservation),
    Cancelled { id: Ulid, room_id: RoomId },
    RoomPurged { room_id: RoomId },
}

/// The interval store: every live reservation, grouped per room.
///
/// Each room's schedule sits behind its own `RwLock`. Writers hold it across
/// overlap check + WAL append + apply, so check-and-insert is one atomic unit
/// per room.
pub struct Engine {
    state: DashMap<RoomId, SharedSchedule>,
    wal: WalWriter<ReservationRecord>,
    /// Reverse lookup: reservation id → room id
    reservation_to_room: DashMap<Ulid, RoomId>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can slip between the snapshot and the file swap.
    compaction_gate: RwLock<()>,
}

fn apply_record(
    schedules: &mut HashMap<RoomId, RoomSchedule>,
    index: &DashMap<Ulid, RoomId>,
    record: ReservationRecord,
) {
    match record {
        ReservationRecord::Created(reservation) => {
            index.insert(reservation.id, reservation.room_id);
            schedules
                .entry(reservation.room_id)
                .or_insert_with(|| RoomSchedule::new(reservation.room_id))
                .insert(reservation);
        }
        ReservationRecord::Cancelled { id, room_id } => {
            if let Some(schedule) = schedules.get_mut(&room_id) {
                schedule.remove(id);
            }
            index.remove(&id);
        }
        ReservationRecord::RoomPurged { room_id } => {
            if let Some(schedule) = schedules.get_mut(&room_id) {
                for reservation in schedule.purge() {
                    index.remove(&reservation.id);
                }
            }
        }
    }
}

impl Engine {
    /// Open the store at `wal_path`, replaying whatever the log holds.
    /// Must be called from within a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let records = Wal::<ReservationRecord>::replay(&wal_path)?;
        let replayed = records.len();
        let wal = Wal::open(&wal_path)?;

        let reservation_to_room = DashMap::new();
        let mut schedules = HashMap::new();
        for record in records {
            apply_record(&mut schedules, &reservation_to_room, record);
        }

        let state = DashMap::new();
        for (room_id, schedule) in schedules {
            state.insert(room_id, Arc::new(RwLock::new(schedule)));
        }

        tracing::info!(
            path = %wal_path.display(),
            records = replayed,
            live = reservation_to_room.len(),
            "reservation store opened"
        );

        Ok(Self {
            state,
            wal: WalWriter::spawn(wal, crate::observability::RESERVATION_WAL_BATCH_SIZE),
            reservation_to_room,
            compaction_gate: RwLock::new(()),
        })
    }

    pub(super) async fn wal_append(&self, record: ReservationRecord) -> Result<(), EngineError> {
        self.wal
            .append(record)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_schedule(&self, room_id: RoomId) -> Option<SharedSchedule> {
        self.state.get(&room_id).map(|e| e.value().clone())
    }

    /// Schedules are created on first use; the reservation service keeps no
    /// copy of the room itself.
    pub(super) fn schedule_for(&self, room_id: RoomId) -> SharedSchedule {
        self.state
            .entry(room_id)
            .or_insert_with(|| Arc::new(RwLock::new(RoomSchedule::new(room_id))))
            .value()
            .clone()
    }

    pub fn room_for_reservation(&self, id: &Ulid) -> Option<RoomId> {
        self.reservation_to_room.get(id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_room.len()
    }
}
