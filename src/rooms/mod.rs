mod service;

pub use service::{Committed, RoomService};

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;
use crate::wal::{Wal, WalWriter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomRecord {
    Created(Room),
    Updated(Room),
    Deleted { id: RoomId },
    /// Written at the head of a compacted log so deleted ids stay retired.
    Sequence { next_id: RoomId },
}

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room {0} not found")]
    NotFound(RoomId),
    #[error("room with name '{0}' already exists")]
    NameTaken(String),
    #[error("invalid room: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub equipment: Option<String>,
}

/// Partial update. `equipment: Some(None)` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub equipment: Option<Option<String>>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.capacity.is_none() && self.equipment.is_none()
    }
}

/// A present key (even `null`) becomes `Some(..)`; a missing key stays `None`.
fn present_or_null<'de, D>(d: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(d).map(Some)
}

fn validate_name(name: &str) -> Result<(), RoomError> {
    if name.trim().is_empty() {
        return Err(RoomError::Invalid("name must not be empty"));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(RoomError::LimitExceeded("room name too long"));
    }
    Ok(())
}

fn validate_fields(name: &str, capacity: u32, equipment: Option<&str>) -> Result<(), RoomError> {
    validate_name(name)?;
    if capacity == 0 {
        return Err(RoomError::Invalid("capacity must be at least 1"));
    }
    if equipment.is_some_and(|e| e.len() > MAX_EQUIPMENT_LEN) {
        return Err(RoomError::LimitExceeded("equipment too long"));
    }
    Ok(())
}

#[derive(Default)]
struct RoomTable {
    by_id: BTreeMap<RoomId, Room>,
    by_name: HashMap<String, RoomId>,
    /// Ids are never reused, even after deletion.
    next_id: RoomId,
}

impl RoomTable {
    fn apply(&mut self, record: RoomRecord) {
        match record {
            RoomRecord::Created(room) | RoomRecord::Updated(room) => {
                if let Some(old) = self.by_id.get(&room.id) {
                    self.by_name.remove(&old.name);
                }
                self.next_id = self.next_id.max(room.id + 1);
                self.by_name.insert(room.name.clone(), room.id);
                self.by_id.insert(room.id, room);
            }
            RoomRecord::Deleted { id } => {
                if let Some(old) = self.by_id.remove(&id) {
                    self.by_name.remove(&old.name);
                }
            }
            RoomRecord::Sequence { next_id } => {
                self.next_id = self.next_id.max(next_id);
            }
        }
    }

    fn name_owner(&self, name: &str) -> Option<RoomId> {
        self.by_name.get(name).copied()
    }
}

/// Rooms keyed by id, with unique names. One writer at a time; the table
/// lock is held across name check + WAL append + apply.
pub struct RoomStore {
    table: RwLock<RoomTable>,
    wal: WalWriter<RoomRecord>,
}

impl RoomStore {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let records = Wal::<RoomRecord>::replay(&wal_path)?;
        let replayed = records.len();
        let wal = Wal::open(&wal_path)?;

        let mut table = RoomTable {
            next_id: 1,
            ..Default::default()
        };
        for record in records {
            table.apply(record);
        }
        tracing::info!(
            path = %wal_path.display(),
            records = replayed,
            rooms = table.by_id.len(),
            "room store opened"
        );

        Ok(Self {
            table: RwLock::new(table),
            wal: WalWriter::spawn(wal, crate::observability::ROOM_WAL_BATCH_SIZE),
        })
    }

    async fn wal_append(&self, record: RoomRecord) -> Result<(), RoomError> {
        self.wal
            .append(record)
            .await
            .map_err(|e| RoomError::WalError(e.to_string()))
    }

    pub async fn create(&self, new: NewRoom) -> Result<Room, RoomError> {
        validate_fields(&new.name, new.capacity, new.equipment.as_deref())?;
        let mut table = self.table.write().await;
        if table.by_id.len() >= MAX_ROOMS {
            return Err(RoomError::LimitExceeded("too many rooms"));
        }
        if table.name_owner(&new.name).is_some() {
            return Err(RoomError::NameTaken(new.name));
        }

        let room = Room {
            id: table.next_id,
            name: new.name,
            capacity: new.capacity,
            equipment: new.equipment,
            created_at: now_ms(),
        };
        self.wal_append(RoomRecord::Created(room.clone())).await?;
        table.apply(RoomRecord::Created(room.clone()));
        Ok(room)
    }

    pub async fn update(&self, id: RoomId, patch: RoomPatch) -> Result<Room, RoomError> {
        if patch.is_empty() {
            return Err(RoomError::Invalid("no update data provided"));
        }
        let mut table = self.table.write().await;
        let mut room = table.by_id.get(&id).cloned().ok_or(RoomError::NotFound(id))?;

        if let Some(name) = patch.name {
            if name != room.name && table.name_owner(&name).is_some() {
                return Err(RoomError::NameTaken(name));
            }
            room.name = name;
        }
        if let Some(capacity) = patch.capacity {
            room.capacity = capacity;
        }
        if let Some(equipment) = patch.equipment {
            room.equipment = equipment;
        }
        validate_fields(&room.name, room.capacity, room.equipment.as_deref())?;

        self.wal_append(RoomRecord::Updated(room.clone())).await?;
        table.apply(RoomRecord::Updated(room.clone()));
        Ok(room)
    }

    pub async fn delete(&self, id: RoomId) -> Result<Room, RoomError> {
        let mut table = self.table.write().await;
        let room = table.by_id.get(&id).cloned().ok_or(RoomError::NotFound(id))?;
        self.wal_append(RoomRecord::Deleted { id }).await?;
        table.apply(RoomRecord::Deleted { id });
        Ok(room)
    }

    pub async fn get(&self, id: RoomId) -> Option<Room> {
        self.table.read().await.by_id.get(&id).cloned()
    }

    /// All rooms ordered by id.
    pub async fn list(&self) -> Vec<Room> {
        self.table.read().await.by_id.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.by_id.len()
    }

    /// Rewrite the WAL as one `Created` record per live room.
    pub async fn compact_wal(&self) -> Result<(), RoomError> {
        // Write lock: no mutation may land between snapshot and swap.
        let table = self.table.write().await;
        let mut records = vec![RoomRecord::Sequence { next_id: table.next_id }];
        records.extend(table.by_id.values().cloned().map(RoomRecord::Created));
        let live = table.by_id.len();
        self.wal
            .compact(records)
            .await
            .map_err(|e| RoomError::WalError(e.to_string()))?;
        drop(table);
        tracing::info!(live, "room WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
