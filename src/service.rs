use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::auth::{authorize, authorize_owner, Principal, Role};
use crate::engine::{Availability, DateRange, Engine, EngineError, Rejection, ReservationFilter};
use crate::error::ServiceError;
use crate::model::*;
use crate::observability::RESERVATIONS_REJECTED_TOTAL;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub room_id: RoomId,
    /// ISO-8601; a timestamp without offset is taken as UTC.
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub room_id: Option<RoomId>,
    /// `YYYY-MM-DD`, matched against the start time.
    #[serde(default)]
    pub date: Option<String>,
    /// Honoured for admins only.
    #[serde(default)]
    pub subject_id: Option<SubjectId>,
}

pub struct ReservationService {
    engine: Arc<Engine>,
}

fn rejection_label(err: &EngineError) -> Option<&'static str> {
    match err {
        EngineError::Rejected(Rejection::InvalidInterval) => Some("invalid_interval"),
        EngineError::Rejected(Rejection::OutOfRange(_)) => Some("out_of_range"),
        EngineError::Rejected(Rejection::PastStart) => Some("past_start"),
        EngineError::Rejected(Rejection::Overlap { .. }) => Some("overlap"),
        _ => None,
    }
}

fn parse_time(field: &str, value: &str) -> Result<Ms, ServiceError> {
    parse_timestamp(value).ok_or_else(|| {
        ServiceError::Validation(format!(
            "invalid {field} {value:?}, expected ISO format (YYYY-MM-DDTHH:MM:SS)"
        ))
    })
}

impl ReservationService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Book a room for the caller. `now` is the submission time.
    pub async fn create(
        &self,
        principal: &Principal,
        req: &NewReservation,
        now: Ms,
    ) -> Result<Reservation, ServiceError> {
        if !authorize(principal, Role::Employee) {
            return Err(ServiceError::Authorization("not allowed to reserve".into()));
        }
        let start = parse_time("start_time", &req.start_time)?;
        let end = parse_time("end_time", &req.end_time)?;

        match self
            .engine
            .reserve(req.room_id, Span::unchecked(start, end), principal.subject_id, now)
            .await
        {
            Ok(reservation) => {
                tracing::info!(
                    id = %reservation.id,
                    room_id = req.room_id,
                    by = principal.subject_id,
                    "reservation created"
                );
                Ok(reservation)
            }
            Err(e) => {
                if let Some(reason) = rejection_label(&e) {
                    metrics::counter!(RESERVATIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
                    tracing::debug!(room_id = req.room_id, reason, "reservation rejected");
                }
                Err(e.into())
            }
        }
    }

    /// Employees see only their own reservations; admins see everything and
    /// may filter by subject.
    pub async fn list(&self, principal: &Principal, query: &ListQuery) -> Result<Vec<Reservation>, ServiceError> {
        let date = match &query.date {
            Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                ServiceError::Validation(format!("invalid date {raw:?}, expected YYYY-MM-DD"))
            })?),
            None => None,
        };
        let subject_id = if principal.is_admin() {
            query.subject_id
        } else {
            Some(principal.subject_id)
        };
        let filter = ReservationFilter {
            room_id: query.room_id,
            subject_id,
            date,
        };
        Ok(self.engine.list(&filter).await)
    }

    pub async fn get(&self, principal: &Principal, id: Ulid) -> Result<Reservation, ServiceError> {
        let reservation = self
            .engine
            .get(id)
            .await
            .ok_or_else(|| ServiceError::NotFound("reservation not found".into()))?;
        if !authorize_owner(principal, reservation.subject_id) {
            return Err(ServiceError::Authorization(
                "you do not have permission to access this reservation".into(),
            ));
        }
        Ok(reservation)
    }

    pub async fn cancel(&self, principal: &Principal, id: Ulid) -> Result<Reservation, ServiceError> {
        // Ownership check first, so strangers learn nothing beyond 403/404.
        self.get(principal, id).await?;
        let removed = self.engine.cancel(id).await?;
        tracing::info!(%id, room_id = removed.room_id, by = principal.subject_id, "reservation cancelled");
        Ok(removed)
    }

    /// Booked slots for a room over an inclusive `YYYY-MM-DD` date range.
    pub async fn availability(
        &self,
        principal: &Principal,
        room_id: RoomId,
        start_date: &str,
        end_date: &str,
    ) -> Result<Availability, ServiceError> {
        if !authorize(principal, Role::Employee) {
            return Err(ServiceError::Authorization("not allowed to query availability".into()));
        }
        let range = DateRange::parse(start_date, end_date)?;
        Ok(self.engine.booked_slots(room_id, &range).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const ADMIN: Principal = Principal { subject_id: 1, role: Role::Admin };
    const ALICE: Principal = Principal { subject_id: 10, role: Role::Employee };
    const BOB: Principal = Principal { subject_id: 11, role: Role::Employee };
    // 2024-12-31T00:00:00Z
    const NOW: Ms = 1_735_603_200_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomkeep_test_service");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str) -> ReservationService {
        ReservationService::new(Arc::new(Engine::new(test_wal_path(name)).unwrap()))
    }

    fn req(room_id: RoomId, start: &str, end: &str) -> NewReservation {
        NewReservation {
            room_id,
            start_time: start.into(),
            end_time: end.into(),
        }
    }

    #[tokio::test]
    async fn boundary_touching_both_succeed() {
        let svc = service("touch.wal");
        svc.create(&ALICE, &req(1, "2025-01-02T10:00:00Z", "2025-01-02T11:00:00Z"), NOW)
            .await
            .unwrap();
        svc.create(&BOB, &req(1, "2025-01-02T11:00:00Z", "2025-01-02T12:00:00Z"), NOW)
            .await
            .unwrap();
        let err = svc
            .create(&BOB, &req(1, "2025-01-02T10:30:00", "2025-01-02T11:30:00"), NOW)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn validation_errors_are_400() {
        let svc = service("validation.wal");
        for (s, e) in [
            ("yesterday", "2025-01-02T11:00:00Z"),
            ("2025-01-02T11:00:00Z", "2025-01-02T10:00:00Z"),
            ("2024-12-30T10:00:00Z", "2024-12-30T11:00:00Z"),
        ] {
            let err = svc.create(&ALICE, &req(1, s, e), NOW).await.unwrap_err();
            assert_eq!(err.status(), 400, "{s} .. {e}: {err}");
        }
    }

    #[tokio::test]
    async fn employees_see_only_their_own() {
        let svc = service("list.wal");
        let a = svc
            .create(&ALICE, &req(1, "2025-01-02T10:00:00Z", "2025-01-02T11:00:00Z"), NOW)
            .await
            .unwrap();
        let b = svc
            .create(&BOB, &req(2, "2025-01-03T10:00:00Z", "2025-01-03T11:00:00Z"), NOW)
            .await
            .unwrap();

        // Bob asking for Alice's reservations still only gets his own.
        let q = ListQuery { subject_id: Some(ALICE.subject_id), ..Default::default() };
        assert_eq!(svc.list(&BOB, &q).await.unwrap(), vec![b.clone()]);
        assert_eq!(svc.list(&ADMIN, &q).await.unwrap(), vec![a.clone()]);
        assert_eq!(svc.list(&ADMIN, &ListQuery::default()).await.unwrap(), vec![a.clone(), b]);

        let by_date = ListQuery { date: Some("2025-01-02".into()), ..Default::default() };
        assert_eq!(svc.list(&ADMIN, &by_date).await.unwrap(), vec![a]);

        let bad = ListQuery { date: Some("02/01/2025".into()), ..Default::default() };
        assert_eq!(svc.list(&ADMIN, &bad).await.unwrap_err().status(), 400);
    }

    #[tokio::test]
    async fn owner_or_admin_can_cancel() {
        let svc = service("cancel.wal");
        let r = svc
            .create(&ALICE, &req(1, "2025-01-02T10:00:00Z", "2025-01-02T11:00:00Z"), NOW)
            .await
            .unwrap();
        assert_eq!(svc.get(&BOB, r.id).await.unwrap_err().status(), 403);
        assert_eq!(svc.cancel(&BOB, r.id).await.unwrap_err().status(), 403);
        assert_eq!(svc.get(&ALICE, r.id).await.unwrap(), r);
        svc.cancel(&ADMIN, r.id).await.unwrap();
        assert_eq!(svc.cancel(&ALICE, r.id).await.unwrap_err().status(), 404);
    }

    #[tokio::test]
    async fn availability_range_errors_and_empty() {
        let svc = service("avail.wal");
        let err = svc.availability(&ALICE, 1, "2024-01-03", "2024-01-01").await.unwrap_err();
        assert_eq!(err.status(), 400);
        let err = svc.availability(&ALICE, 1, "2024-01-01", "soon").await.unwrap_err();
        assert_eq!(err.status(), 400);

        let empty = svc.availability(&ALICE, 1, "2024-01-01", "2024-01-03").await.unwrap();
        assert!(empty.booked.is_empty());
    }
}
