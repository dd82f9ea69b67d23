#![forbid(unsafe_code)]

pub mod feed;
pub mod memory;
pub mod rest;
pub mod types;
pub mod watermark;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bazaar_domain::{Message, Room, RoomId, RoomName, UserId};
use tokio::sync::mpsc;

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// An authenticated session with the hosted platform.
#[derive(Debug, Clone)]
pub struct AuthSession {
	pub user_id: UserId,
	/// Bearer credential forwarded to the notification relay.
	pub access_token: SecretString,
}

/// Auth state transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
	SignedIn(UserId),
	SignedOut,
}

/// Errors from the auth provider.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
	#[error("auth request failed: {0}")]
	Request(String),
	#[error("malformed auth response: {0}")]
	Decode(String),
}

/// Errors from the data store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// The storage uniqueness constraint rejected an insert.
	#[error("unique constraint violated: {0}")]
	UniqueViolation(String),
	#[error("store request failed: {0}")]
	Request(String),
	#[error("malformed row: {0}")]
	Decode(String),
}

/// Errors from the change-feed transport.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
	#[error("feed connect failed: {0}")]
	Connect(String),
	#[error("feed protocol error: {0}")]
	Protocol(String),
}

/// Errors from the notification relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
	#[error("relay request failed: {0}")]
	Request(String),
	#[error("relay rejected the notification: status {0}")]
	Rejected(u16),
}

/// A message to be inserted. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
	pub room_id: RoomId,
	pub author: UserId,
	pub text: String,
}

/// Identity provider seam (`getSession`/`signOut`/auth-change feed).
#[async_trait]
pub trait AuthProvider: Send + Sync {
	/// Current session, or `None` when no identity is authenticated.
	async fn session(&self) -> Result<Option<AuthSession>, AuthError>;

	async fn sign_out(&self) -> Result<(), AuthError>;

	/// Stream of auth state transitions (login/logout).
	fn auth_changes(&self) -> mpsc::UnboundedReceiver<AuthChange>;
}

/// Relational store seam over the `chat_rooms`, `chat_messages` and
/// `profiles_public` tables.
#[async_trait]
pub trait DataStore: Send + Sync {
	/// Lookup a room by its unique name.
	async fn room_by_name(&self, name: &RoomName) -> Result<Option<Room>, StoreError>;

	/// Insert a room. Fails with [`StoreError::UniqueViolation`] when the
	/// name already exists.
	async fn insert_room(&self, name: &RoomName, created_by: &UserId) -> Result<Room, StoreError>;

	/// All rooms whose name starts with `prefix`.
	async fn rooms_with_prefix(&self, prefix: &str) -> Result<Vec<Room>, StoreError>;

	/// Messages for one room, ascending by creation time, at most `limit`.
	async fn messages_in_room(&self, room: RoomId, limit: usize) -> Result<Vec<Message>, StoreError>;

	/// Most recent messages across `rooms`, descending by creation time,
	/// at most `limit` rows overall.
	async fn recent_messages(&self, rooms: &[RoomId], limit: usize) -> Result<Vec<Message>, StoreError>;

	async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError>;

	/// Display names for `ids`. Identities without a profile row are
	/// simply absent from the result.
	async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, StoreError>;
}

/// Live change-feed seam: insert events for one room at a time.
pub trait ChangeFeed: Send + Sync {
	/// Register for insert events on `room`. Dropping the returned
	/// subscription unsubscribes.
	fn subscribe(&self, room: RoomId) -> RoomSubscription;
}

/// Notification relay seam (`support-hook` serverless function).
#[async_trait]
pub trait NotifyRelay: Send + Sync {
	/// Best-effort out-of-band alert for a new customer message. The relay
	/// validates `bearer` on its side.
	async fn notify(&self, room_name: &RoomName, message: &str, bearer: &SecretString) -> Result<(), RelayError>;
}

/// Local last-seen watermark seam, scoped to this machine's profile.
///
/// Persist failures are logged and swallowed by implementations; the
/// watermark is an advisory local cache, never authoritative state.
pub trait WatermarkStore: Send + Sync {
	fn last_seen_ms(&self, room: RoomId) -> Option<i64>;
	fn mark_seen(&self, room: RoomId, now_ms: i64);
}

/// A live registration on the change feed for a single room.
///
/// Dropping the subscription tears the registration down; teardown is
/// unconditional and safe to repeat.
pub struct RoomSubscription {
	room: RoomId,
	rx: mpsc::UnboundedReceiver<Message>,
	_guard: Box<dyn Any + Send>,
}

impl RoomSubscription {
	pub fn new(room: RoomId, rx: mpsc::UnboundedReceiver<Message>, guard: impl Any + Send) -> Self {
		Self {
			room,
			rx,
			_guard: Box::new(guard),
		}
	}

	pub fn room(&self) -> RoomId {
		self.room
	}

	/// Next insert event, or `None` when the feed side is gone.
	pub async fn recv(&mut self) -> Option<Message> {
		self.rx.recv().await
	}

	/// Non-blocking variant of [`RoomSubscription::recv`].
	pub fn try_recv(&mut self) -> Option<Message> {
		self.rx.try_recv().ok()
	}
}

impl fmt::Debug for RoomSubscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RoomSubscription").field("room", &self.room).finish()
	}
}
