#![forbid(unsafe_code)]

use bazaar_domain::{Message, RoomId};
use bazaar_platform::{ChangeFeed, RoomSubscription};
use tracing::debug;

/// At most one live room subscription at a time.
///
/// Switching always tears the previous registration down before creating
/// the next one, so duplicate deliveries from overlapping registrations
/// cannot happen.
#[derive(Debug, Default)]
pub struct ActiveSubscription {
	current: Option<RoomSubscription>,
}

impl ActiveSubscription {
	pub fn new() -> Self {
		Self::default()
	}

	/// Drop any existing subscription, then subscribe to `room`.
	pub fn switch_to(&mut self, feed: &dyn ChangeFeed, room: RoomId) {
		self.clear();
		debug!(%room, "subscribing to room feed");
		self.current = Some(feed.subscribe(room));
	}

	/// Tear down the current subscription. Safe to call repeatedly.
	pub fn clear(&mut self) {
		if let Some(sub) = self.current.take() {
			debug!(room = %sub.room(), "dropping room feed subscription");
		}
	}

	pub fn is_live(&self) -> bool {
		self.current.is_some()
	}

	pub fn room(&self) -> Option<RoomId> {
		self.current.as_ref().map(|s| s.room())
	}

	/// Next insert event on the live subscription.
	///
	/// Pends forever when no subscription is live; pair with a
	/// `select!` guard on [`ActiveSubscription::is_live`].
	pub async fn recv(&mut self) -> Option<Message> {
		match self.current.as_mut() {
			Some(sub) => sub.recv().await,
			None => std::future::pending().await,
		}
	}
}

#[cfg(test)]
mod tests {
	use bazaar_domain::{RoomName, UserId};
	use bazaar_platform::{DataStore, NewMessage};
	use bazaar_platform::memory::MemoryBackend;

	use super::*;

	fn user(id: &str) -> UserId {
		UserId::new(id).expect("valid UserId")
	}

	#[tokio::test]
	async fn switch_leaves_exactly_one_registration() {
		let backend = MemoryBackend::new();
		let u = user("cust-1");
		let room_a = backend.insert_room(&RoomName::ticket(&u), &u).await.unwrap();
		let room_b = backend.insert_room(&RoomName::ticket(&user("cust-2")), &u).await.unwrap();

		let mut active = ActiveSubscription::new();
		active.switch_to(&backend, room_a.id);
		assert_eq!(backend.subscriber_count(room_a.id), 1);

		active.switch_to(&backend, room_b.id);
		assert_eq!(backend.subscriber_count(room_a.id), 0);
		assert_eq!(backend.subscriber_count(room_b.id), 1);
		assert_eq!(active.room(), Some(room_b.id));
	}

	#[tokio::test]
	async fn clear_is_idempotent() {
		let backend = MemoryBackend::new();
		let u = user("cust-1");
		let room = backend.insert_room(&RoomName::ticket(&u), &u).await.unwrap();

		let mut active = ActiveSubscription::new();
		active.switch_to(&backend, room.id);
		active.clear();
		active.clear();
		assert!(!active.is_live());
		assert_eq!(backend.subscriber_count(room.id), 0);
	}

	#[tokio::test]
	async fn recv_delivers_inserts_for_the_live_room() {
		let backend = MemoryBackend::new();
		let u = user("cust-1");
		let room = backend.insert_room(&RoomName::ticket(&u), &u).await.unwrap();

		let mut active = ActiveSubscription::new();
		active.switch_to(&backend, room.id);
		backend
			.insert_message(NewMessage {
				room_id: room.id,
				author: u.clone(),
				text: "hello".to_string(),
			})
			.await
			.unwrap();

		let msg = tokio::time::timeout(std::time::Duration::from_secs(1), active.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(msg.text, "hello");
	}
}
