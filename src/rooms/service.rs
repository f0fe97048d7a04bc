use std::sync::Arc;

use crate::auth::{authorize, Principal, Role};
use crate::error::ServiceError;
use crate::model::{LifecycleEvent, Room, RoomId};
use crate::publisher::{LifecyclePublisher, PublishOutcome};

use super::{NewRoom, RoomPatch, RoomStore};

/// A committed mutation plus what became of its lifecycle event. The event
/// outcome never turns a committed mutation into a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub value: T,
    pub event: PublishOutcome,
}

pub struct RoomService {
    store: Arc<RoomStore>,
    publisher: LifecyclePublisher,
}

fn require(principal: &Principal, role: Role) -> Result<(), ServiceError> {
    if authorize(principal, role) {
        Ok(())
    } else {
        Err(ServiceError::Authorization("admin privileges required".into()))
    }
}

impl RoomService {
    pub fn new(store: Arc<RoomStore>, publisher: LifecyclePublisher) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<RoomStore> {
        &self.store
    }

    pub async fn create(&self, principal: &Principal, new: NewRoom) -> Result<Committed<Room>, ServiceError> {
        require(principal, Role::Admin)?;
        let room = self.store.create(new).await?;
        tracing::info!(room_id = room.id, name = %room.name, by = principal.subject_id, "room created");
        let event = self.publisher.publish(&LifecycleEvent::Created(room.snapshot())).await;
        Ok(Committed { value: room, event })
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: RoomId,
        patch: RoomPatch,
    ) -> Result<Committed<Room>, ServiceError> {
        require(principal, Role::Admin)?;
        let room = self.store.update(id, patch).await?;
        tracing::info!(room_id = id, by = principal.subject_id, "room updated");
        let event = self.publisher.publish(&LifecycleEvent::Updated(room.snapshot())).await;
        Ok(Committed { value: room, event })
    }

    /// Succeeds once the local delete commits. Reservations on the room are
    /// removed later, when the reservation service consumes the event.
    pub async fn delete(&self, principal: &Principal, id: RoomId) -> Result<Committed<Room>, ServiceError> {
        require(principal, Role::Admin)?;
        let room = self.store.delete(id).await?;
        tracing::info!(room_id = id, by = principal.subject_id, "room deleted");
        let event = self.publisher.publish(&LifecycleEvent::Deleted { room_id: id }).await;
        Ok(Committed { value: room, event })
    }

    pub async fn get(&self, principal: &Principal, id: RoomId) -> Result<Room, ServiceError> {
        require(principal, Role::Employee)?;
        self.store
            .get(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("room {id} not found")))
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<Room>, ServiceError> {
        require(principal, Role::Employee)?;
        Ok(self.store.list().await)
    }
}
