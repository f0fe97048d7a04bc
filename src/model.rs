use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Room identity. Assigned by the room store, referenced by id everywhere else.
pub type RoomId = i64;

/// Identity of whoever booked a reservation, as asserted by the identity authority.
pub type SubjectId = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span without the ordering assertion. Used for candidate spans
    /// straight from callers, which are validated before use.
    pub const fn unchecked(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: RoomId,
    pub subject_id: SubjectId,
    pub span: Span,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub equipment: Option<String>,
    pub created_at: Ms,
}

impl Room {
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            equipment: self.equipment.clone(),
        }
    }
}

/// Room attributes as carried on the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub equipment: Option<String>,
}

// ── Lifecycle events ─────────────────────────────────────────────

pub const ROOM_CREATED: &str = "room_created";
pub const ROOM_UPDATED: &str = "room_updated";
pub const ROOM_DELETED: &str = "room_deleted";

/// A room mutation announced to other services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created(RoomSnapshot),
    Updated(RoomSnapshot),
    Deleted { room_id: RoomId },
    /// An `event_type` this build does not know. Acknowledged and ignored.
    Unknown(String),
}

/// JSON shape on the channel: `{event_type, room?, room_id?}`.
#[derive(Debug, Serialize, Deserialize)]
struct EventEnvelope {
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room: Option<RoomSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    room_id: Option<RoomId>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{event_type} event is missing `{field}`")]
    MissingField {
        event_type: &'static str,
        field: &'static str,
    },
}

impl LifecycleEvent {
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            LifecycleEvent::Created(room) | LifecycleEvent::Updated(room) => Some(room.id),
            LifecycleEvent::Deleted { room_id } => Some(*room_id),
            LifecycleEvent::Unknown(_) => None,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            LifecycleEvent::Created(_) => ROOM_CREATED,
            LifecycleEvent::Updated(_) => ROOM_UPDATED,
            LifecycleEvent::Deleted { .. } => ROOM_DELETED,
            LifecycleEvent::Unknown(kind) => kind.as_str(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let envelope = match self {
            LifecycleEvent::Created(room) | LifecycleEvent::Updated(room) => EventEnvelope {
                event_type: self.event_type().to_string(),
                room: Some(room.clone()),
                room_id: None,
            },
            LifecycleEvent::Deleted { room_id } => EventEnvelope {
                event_type: ROOM_DELETED.to_string(),
                room: None,
                room_id: Some(*room_id),
            },
            LifecycleEvent::Unknown(kind) => EventEnvelope {
                event_type: kind.clone(),
                room: None,
                room_id: None,
            },
        };
        serde_json::to_vec(&envelope)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        match envelope.event_type.as_str() {
            ROOM_CREATED => envelope
                .room
                .map(LifecycleEvent::Created)
                .ok_or(DecodeError::MissingField { event_type: ROOM_CREATED, field: "room" }),
            ROOM_UPDATED => envelope
                .room
                .map(LifecycleEvent::Updated)
                .ok_or(DecodeError::MissingField { event_type: ROOM_UPDATED, field: "room" }),
            ROOM_DELETED => envelope
                .room_id
                .map(|room_id| LifecycleEvent::Deleted { room_id })
                .ok_or(DecodeError::MissingField { event_type: ROOM_DELETED, field: "room_id" }),
            _ => Ok(LifecycleEvent::Unknown(envelope.event_type)),
        }
    }
}

// ── Time helpers ─────────────────────────────────────────────────

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse an ISO-8601 timestamp. Accepts an offset (`Z`, `+02:00`) or a naive
/// timestamp, which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// RFC 3339 in UTC with a `Z` suffix; fractional seconds only when non-zero.
pub fn format_timestamp(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| ms.to_string())
}
