use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::auth::{Principal, TokenAuth};
use crate::engine::Availability;
use crate::error::ServiceError;
use crate::limits::MAX_LINE_LEN;
use crate::model::{format_timestamp, now_ms, Reservation, Room, RoomId, SubjectId};
use crate::observability::{AUTH_FAILURES_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::publisher::PublishOutcome;
use crate::rooms::{Committed, NewRoom, RoomPatch, RoomService};
use crate::service::{ListQuery, NewReservation, ReservationService};

/// One JSON object per line, e.g.
/// `{"token": "...", "principal": {"subject_id": 7, "role": "Employee"}, "op": {"type": "get_room", "id": 1}}`
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub token: String,
    pub principal: Principal,
    pub op: Op,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    CreateRoom(NewRoom),
    UpdateRoom { id: RoomId, patch: RoomPatch },
    DeleteRoom { id: RoomId },
    GetRoom { id: RoomId },
    ListRooms,
    CreateReservation(NewReservation),
    ListReservations(ListQuery),
    GetReservation { id: String },
    CancelReservation { id: String },
    Availability { room_id: RoomId, start_date: String, end_date: String },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::CreateRoom(_) => "create_room",
            Op::UpdateRoom { .. } => "update_room",
            Op::DeleteRoom { .. } => "delete_room",
            Op::GetRoom { .. } => "get_room",
            Op::ListRooms => "list_rooms",
            Op::CreateReservation(_) => "create_reservation",
            Op::ListReservations(_) => "list_reservations",
            Op::GetReservation { .. } => "get_reservation",
            Op::CancelReservation { .. } => "cancel_reservation",
            Op::Availability { .. } => "availability",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { status: u16, body: Value },
    Err { status: u16, error: ErrorBody },
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Ok { status, .. } | Response::Err { status, .. } => *status,
        }
    }

    fn from_result(result: Result<Value, ServiceError>) -> Self {
        match result {
            Ok(body) => Response::Ok { status: 200, body },
            Err(e) => Response::Err {
                status: e.status(),
                error: ErrorBody { kind: e.kind().to_string(), message: e.to_string() },
            },
        }
    }
}

/// Everything a connection needs. A service is `None` when this process
/// does not host it.
pub struct App {
    pub auth: TokenAuth,
    pub rooms: Option<RoomService>,
    pub reservations: Option<ReservationService>,
}

// ── Response bodies ──────────────────────────────────────────────
//
// Times go out in the same ISO-8601 form requests use.

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub equipment: Option<String>,
    pub created_at: String,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            name: room.name.clone(),
            capacity: room.capacity,
            equipment: room.equipment.clone(),
            created_at: format_timestamp(room.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub room_id: RoomId,
    pub subject_id: SubjectId,
    pub start_time: String,
    pub end_time: String,
    pub created_at: String,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            room_id: r.room_id,
            subject_id: r.subject_id,
            start_time: format_timestamp(r.span.start),
            end_time: format_timestamp(r.span.end),
            created_at: format_timestamp(r.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityView {
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub booked: Vec<ReservationView>,
    pub free: Vec<SlotView>,
}

impl From<&Availability> for AvailabilityView {
    fn from(a: &Availability) -> Self {
        Self {
            room_id: a.room_id,
            start_date: a.range.start,
            end_date: a.range.end,
            booked: a.booked.iter().map(ReservationView::from).collect(),
            free: a
                .free
                .iter()
                .map(|s| SlotView {
                    start_time: format_timestamp(s.start),
                    end_time: format_timestamp(s.end),
                })
                .collect(),
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Storage(format!("encode: {e}")))
}

fn reservations_body(list: &[Reservation]) -> Result<Value, ServiceError> {
    to_body(&list.iter().map(ReservationView::from).collect::<Vec<_>>())
}

fn room_committed_body(committed: &Committed<Room>) -> Result<Value, ServiceError> {
    let mut event = json!({ "published": committed.event.is_published() });
    if let PublishOutcome::Dropped { reason } = &committed.event {
        event["reason"] = json!(reason);
    }
    Ok(json!({ "room": to_body(&RoomView::from(&committed.value))?, "event": event }))
}

fn parse_ulid(raw: &str) -> Result<Ulid, ServiceError> {
    Ulid::from_string(raw).map_err(|_| ServiceError::Validation(format!("invalid reservation id {raw:?}")))
}

impl App {
    fn rooms(&self) -> Result<&RoomService, ServiceError> {
        self.rooms
            .as_ref()
            .ok_or_else(|| ServiceError::NotFound("room operations are not served here".into()))
    }

    fn reservations(&self) -> Result<&ReservationService, ServiceError> {
        self.reservations
            .as_ref()
            .ok_or_else(|| ServiceError::NotFound("reservation operations are not served here".into()))
    }

    async fn dispatch(&self, principal: &Principal, op: Op) -> Result<Value, ServiceError> {
        match op {
            Op::CreateRoom(new) => room_committed_body(&self.rooms()?.create(principal, new).await?),
            Op::UpdateRoom { id, patch } => {
                room_committed_body(&self.rooms()?.update(principal, id, patch).await?)
            }
            Op::DeleteRoom { id } => room_committed_body(&self.rooms()?.delete(principal, id).await?),
            Op::GetRoom { id } => to_body(&RoomView::from(&self.rooms()?.get(principal, id).await?)),
            Op::ListRooms => {
                let rooms = self.rooms()?.list(principal).await?;
                to_body(&rooms.iter().map(RoomView::from).collect::<Vec<_>>())
            }
            Op::CreateReservation(req) => {
                let created = self.reservations()?.create(principal, &req, now_ms()).await?;
                to_body(&ReservationView::from(&created))
            }
            Op::ListReservations(query) => {
                reservations_body(&self.reservations()?.list(principal, &query).await?)
            }
            Op::GetReservation { id } => {
                let found = self.reservations()?.get(principal, parse_ulid(&id)?).await?;
                to_body(&ReservationView::from(&found))
            }
            Op::CancelReservation { id } => {
                let removed = self.reservations()?.cancel(principal, parse_ulid(&id)?).await?;
                to_body(&ReservationView::from(&removed))
            }
            Op::Availability { room_id, start_date, end_date } => {
                let availability = self
                    .reservations()?
                    .availability(principal, room_id, &start_date, &end_date)
                    .await?;
                to_body(&AvailabilityView::from(&availability))
            }
        }
    }

    /// Decode, authenticate and execute one request line.
    pub async fn handle_line(&self, line: &str) -> Response {
        let started = Instant::now();
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => "malformed", "status" => "400").increment(1);
                return Response::from_result(Err(ServiceError::Validation(format!(
                    "malformed request: {e}"
                ))));
            }
        };
        let op_name = request.op.name();

        let response = if !self.auth.verify(&request.token) {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(op = op_name, subject = request.principal.subject_id, "rejected token");
            Response::from_result(Err(ServiceError::Unauthenticated))
        } else {
            let result = self.dispatch(&request.principal, request.op).await;
            if let Err(e) = &result {
                tracing::debug!(op = op_name, status = e.status(), "request failed: {e}");
            }
            Response::from_result(result)
        };

        metrics::counter!(REQUESTS_TOTAL, "op" => op_name, "status" => response.status().to_string())
            .increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op_name)
            .record(started.elapsed().as_secs_f64());
        response
    }
}

/// Serve one client until it hangs up.
pub async fn process_connection<S>(socket: S, app: Arc<App>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => app.handle_line(&line).await,
            // The codec skips to the next newline, so the connection stays usable.
            Err(LinesCodecError::MaxLineLengthExceeded) => Response::from_result(Err(
                ServiceError::Validation(format!("request exceeds {MAX_LINE_LEN} bytes")),
            )),
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        framed.send(encoded).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::other(other),
        })?;
    }
    Ok(())
}
