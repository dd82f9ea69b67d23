#![forbid(unsafe_code)]

use bazaar_domain::{Room, RoomName, UserId};
use bazaar_platform::{DataStore, StoreError};
use tracing::{debug, info};

use crate::{ClientCoreError, Session};

/// Find or create the room with `name`.
///
/// Lookup first, insert on miss. When two clients race on the same name the
/// loser's insert hits the uniqueness constraint; it then re-reads and both
/// end up on the same row.
pub async fn ensure_room(store: &dyn DataStore, name: &RoomName, creator: &UserId) -> Result<Room, ClientCoreError> {
	if let Some(room) = store.room_by_name(name).await? {
		debug!(room = %name, "room already provisioned");
		return Ok(room);
	}

	match store.insert_room(name, creator).await {
		Ok(room) => {
			info!(room = %name, "provisioned room");
			Ok(room)
		}
		Err(StoreError::UniqueViolation(_)) => {
			debug!(room = %name, "lost provisioning race, re-reading");
			match store.room_by_name(name).await? {
				Some(room) => Ok(room),
				None => Err(StoreError::Request(format!("room {name} vanished after unique violation")).into()),
			}
		}
		Err(e) => Err(e.into()),
	}
}

/// Find or create the viewer's single support ticket room.
pub async fn ensure_ticket_room(store: &dyn DataStore, user: &UserId) -> Result<Room, ClientCoreError> {
	ensure_room(store, &RoomName::ticket(user), user).await
}

/// Find or create the direct room between the viewer and `other`.
pub async fn ensure_direct_room(store: &dyn DataStore, viewer: &UserId, other: &UserId) -> Result<Room, ClientCoreError> {
	let name = RoomName::direct(viewer, other)?;
	ensure_room(store, &name, viewer).await
}

/// Operator-only: find or create an arbitrarily named room.
pub async fn create_room(store: &dyn DataStore, session: &Session, name: &RoomName) -> Result<Room, ClientCoreError> {
	if !session.is_operator {
		return Err(ClientCoreError::NotAllowed("only operators create named rooms".to_string()));
	}
	ensure_room(store, name, &session.user_id).await
}

/// All ticket rooms, for the operator's inbox.
pub async fn operator_rooms(store: &dyn DataStore) -> Result<Vec<Room>, ClientCoreError> {
	Ok(store.rooms_with_prefix(RoomName::TICKET_PREFIX).await?)
}

#[cfg(test)]
mod tests {
	use bazaar_platform::SecretString;
	use bazaar_platform::memory::MemoryBackend;

	use super::*;

	fn user(id: &str) -> UserId {
		UserId::new(id).expect("valid UserId")
	}

	fn operator_session(id: &str) -> Session {
		Session {
			user_id: user(id),
			access_token: SecretString::new("t"),
			is_operator: true,
		}
	}

	#[tokio::test]
	async fn ensure_is_idempotent() {
		let backend = MemoryBackend::new();
		let u = user("cust-1");

		let first = ensure_ticket_room(&backend, &u).await.unwrap();
		let second = ensure_ticket_room(&backend, &u).await.unwrap();

		assert_eq!(first.id, second.id);
		assert_eq!(backend.rooms().len(), 1);
	}

	#[tokio::test]
	async fn ensure_recovers_from_lost_race() {
		let backend = MemoryBackend::new();
		let u = user("cust-1");
		let name = RoomName::ticket(&u);

		// Another client wins between our lookup and insert; the insert
		// path sees the unique violation and must converge on that row.
		let winner = backend.insert_room(&name, &u).await.unwrap();
		let err = backend.insert_room(&name, &u).await.unwrap_err();
		assert!(matches!(err, StoreError::UniqueViolation(_)));

		let room = ensure_room(&backend, &name, &u).await.unwrap();
		assert_eq!(room.id, winner.id);
	}

	#[tokio::test]
	async fn create_room_requires_operator() {
		let backend = MemoryBackend::new();
		let name = RoomName::new("escalations").unwrap();

		let mut session = operator_session("op-1");
		session.is_operator = false;
		let err = create_room(&backend, &session, &name).await.unwrap_err();
		assert!(matches!(err, ClientCoreError::NotAllowed(_)));
		assert!(backend.rooms().is_empty());

		session.is_operator = true;
		let room = create_room(&backend, &session, &name).await.unwrap();
		assert_eq!(room.name, name);
	}

	#[tokio::test]
	async fn operator_rooms_only_lists_tickets() {
		let backend = MemoryBackend::new();
		let op = user("op-1");
		backend.insert_room(&RoomName::ticket(&user("cust-1")), &op).await.unwrap();
		backend.insert_room(&RoomName::ticket(&user("cust-2")), &op).await.unwrap();
		backend.insert_room(&RoomName::new("general").unwrap(), &op).await.unwrap();

		let rooms = operator_rooms(&backend).await.unwrap();
		assert_eq!(rooms.len(), 2);
		assert!(rooms.iter().all(|r| r.name.as_str().starts_with("ticket_")));
	}
}
