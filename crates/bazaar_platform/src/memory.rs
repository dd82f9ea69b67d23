#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bazaar_domain::{Message, MessageId, Room, RoomId, RoomName, UserId};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
	AuthChange, AuthError, AuthProvider, AuthSession, ChangeFeed, DataStore, NewMessage, NotifyRelay, RelayError,
	RoomSubscription, SecretString, StoreError, WatermarkStore,
};

/// Deterministic in-memory backend implementing every platform seam.
///
/// Used by the demo binary and the sync-core tests. Message inserts echo
/// back through the change feed, like the hosted platform does.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
	inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
	rooms: Vec<Room>,
	messages: Vec<Message>,
	names: HashMap<UserId, String>,
	watermarks: HashMap<RoomId, i64>,
	session: Option<AuthSession>,
	auth_watchers: Vec<mpsc::UnboundedSender<AuthChange>>,
	feed: HashMap<RoomId, Vec<(u64, mpsc::UnboundedSender<Message>)>>,
	next_handler_id: u64,
	now_ms: i64,
	relay_calls: Vec<(RoomName, String)>,
	fail_relay: bool,
	message_insert_attempts: usize,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Install an authenticated session and notify auth watchers.
	pub fn sign_in(&self, user: &UserId) {
		let mut state = self.lock();
		state.session = Some(AuthSession {
			user_id: user.clone(),
			access_token: SecretString::new(format!("token-{user}")),
		});
		let change = AuthChange::SignedIn(user.clone());
		state.auth_watchers.retain(|tx| tx.send(change.clone()).is_ok());
	}

	pub fn set_display_name(&self, user: &UserId, name: impl Into<String>) {
		self.lock().names.insert(user.clone(), name.into());
	}

	/// Fix the clock used for storage timestamps. Each insert advances it
	/// by one millisecond so ordering stays strict.
	pub fn set_now_ms(&self, now_ms: i64) {
		self.lock().now_ms = now_ms;
	}

	pub fn set_fail_relay(&self, fail: bool) {
		self.lock().fail_relay = fail;
	}

	/// Relay invocations observed so far (room name, message text).
	pub fn relay_calls(&self) -> Vec<(RoomName, String)> {
		self.lock().relay_calls.clone()
	}

	/// Number of `insert_message` calls that reached the store.
	pub fn message_insert_attempts(&self) -> usize {
		self.lock().message_insert_attempts
	}

	/// Live feed handler count for a room.
	pub fn subscriber_count(&self, room: RoomId) -> usize {
		self.lock().feed.get(&room).map(|v| v.len()).unwrap_or(0)
	}

	pub fn rooms(&self) -> Vec<Room> {
		self.lock().rooms.clone()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, State> {
		self.inner.lock().expect("memory backend lock")
	}
}

impl State {
	fn tick(&mut self) -> i64 {
		let now = self.now_ms;
		self.now_ms += 1;
		now
	}

	fn dispatch(&mut self, room: RoomId, msg: &Message) {
		if let Some(handlers) = self.feed.get_mut(&room) {
			handlers.retain(|(_, tx)| tx.send(msg.clone()).is_ok());
		}
	}
}

#[async_trait]
impl AuthProvider for MemoryBackend {
	async fn session(&self) -> Result<Option<AuthSession>, AuthError> {
		Ok(self.lock().session.clone())
	}

	async fn sign_out(&self) -> Result<(), AuthError> {
		let mut state = self.lock();
		state.session = None;
		state.auth_watchers.retain(|tx| tx.send(AuthChange::SignedOut).is_ok());
		Ok(())
	}

	fn auth_changes(&self) -> mpsc::UnboundedReceiver<AuthChange> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.lock().auth_watchers.push(tx);
		rx
	}
}

#[async_trait]
impl DataStore for MemoryBackend {
	async fn room_by_name(&self, name: &RoomName) -> Result<Option<Room>, StoreError> {
		Ok(self.lock().rooms.iter().find(|r| &r.name == name).cloned())
	}

	async fn insert_room(&self, name: &RoomName, created_by: &UserId) -> Result<Room, StoreError> {
		let mut state = self.lock();
		if state.rooms.iter().any(|r| &r.name == name) {
			return Err(StoreError::UniqueViolation(format!("chat_rooms.name: {name}")));
		}
		let room = Room {
			id: RoomId::new_v4(),
			name: name.clone(),
			created_by: created_by.clone(),
			created_at_ms: state.tick(),
		};
		state.rooms.push(room.clone());
		Ok(room)
	}

	async fn rooms_with_prefix(&self, prefix: &str) -> Result<Vec<Room>, StoreError> {
		Ok(self
			.lock()
			.rooms
			.iter()
			.filter(|r| r.name.as_str().starts_with(prefix))
			.cloned()
			.collect())
	}

	async fn messages_in_room(&self, room: RoomId, limit: usize) -> Result<Vec<Message>, StoreError> {
		let state = self.lock();
		let mut msgs: Vec<Message> = state.messages.iter().filter(|m| m.room_id == room).cloned().collect();
		msgs.sort_by_key(|m| m.created_at_ms);
		msgs.truncate(limit);
		Ok(msgs)
	}

	async fn recent_messages(&self, rooms: &[RoomId], limit: usize) -> Result<Vec<Message>, StoreError> {
		let state = self.lock();
		let mut msgs: Vec<Message> = state
			.messages
			.iter()
			.filter(|m| rooms.contains(&m.room_id))
			.cloned()
			.collect();
		msgs.sort_by_key(|m| std::cmp::Reverse(m.created_at_ms));
		msgs.truncate(limit);
		Ok(msgs)
	}

	async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
		let mut state = self.lock();
		state.message_insert_attempts += 1;

		if !state.rooms.iter().any(|r| r.id == new.room_id) {
			return Err(StoreError::Request(format!("no such room: {}", new.room_id)));
		}

		let msg = Message {
			id: MessageId::new_v4(),
			room_id: new.room_id,
			author: new.author,
			text: new.text,
			created_at_ms: state.tick(),
		};
		state.messages.push(msg.clone());
		state.dispatch(new.room_id, &msg);
		Ok(msg)
	}

	async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, StoreError> {
		let state = self.lock();
		Ok(ids
			.iter()
			.filter_map(|id| state.names.get(id).map(|name| (id.clone(), name.clone())))
			.collect())
	}
}

impl ChangeFeed for MemoryBackend {
	fn subscribe(&self, room: RoomId) -> RoomSubscription {
		let (tx, rx) = mpsc::unbounded_channel();
		let handler_id = {
			let mut state = self.lock();
			state.next_handler_id += 1;
			let id = state.next_handler_id;
			state.feed.entry(room).or_default().push((id, tx));
			id
		};
		debug!(%room, handler_id, "memory feed subscribe");

		let guard = MemoryFeedGuard {
			inner: Arc::clone(&self.inner),
			room,
			handler_id,
		};
		RoomSubscription::new(room, rx, guard)
	}
}

struct MemoryFeedGuard {
	inner: Arc<Mutex<State>>,
	room: RoomId,
	handler_id: u64,
}

impl Drop for MemoryFeedGuard {
	fn drop(&mut self) {
		if let Ok(mut state) = self.inner.lock()
			&& let Some(handlers) = state.feed.get_mut(&self.room)
		{
			handlers.retain(|(id, _)| *id != self.handler_id);
			if handlers.is_empty() {
				state.feed.remove(&self.room);
			}
		}
	}
}

#[async_trait]
impl NotifyRelay for MemoryBackend {
	async fn notify(&self, room_name: &RoomName, message: &str, _bearer: &SecretString) -> Result<(), RelayError> {
		let mut state = self.lock();
		if state.fail_relay {
			return Err(RelayError::Rejected(502));
		}
		state.relay_calls.push((room_name.clone(), message.to_string()));
		Ok(())
	}
}

impl WatermarkStore for MemoryBackend {
	fn last_seen_ms(&self, room: RoomId) -> Option<i64> {
		self.lock().watermarks.get(&room).copied()
	}

	fn mark_seen(&self, room: RoomId, now_ms: i64) {
		self.lock().watermarks.insert(room, now_ms);
	}
}
