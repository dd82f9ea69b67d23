#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers and room names from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Opaque authenticated user identity. Compared only for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Storage-assigned room identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub uuid::Uuid);

impl RoomId {
	/// Create a new random room id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		let id = uuid::Uuid::parse_str(s).map_err(|_| ParseIdError::InvalidFormat(format!("not a uuid: {s}")))?;
		Ok(Self(id))
	}
}

/// Storage-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Deterministic room name. The name uniquely identifies a logical
/// conversation; the storage layer enforces uniqueness on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

/// Classification of a room name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomKind {
	/// Support ticket between one customer and the operator.
	Ticket(UserId),
	/// Direct conversation between two users, canonically ordered.
	Direct(UserId, UserId),
	/// Operator-created ad-hoc room.
	Other,
}

impl RoomName {
	/// Prefix for support ticket rooms.
	pub const TICKET_PREFIX: &'static str = "ticket_";

	/// Prefix for direct-message rooms.
	pub const DIRECT_PREFIX: &'static str = "dm_";

	/// Separator between the two participants of a direct room.
	pub const DIRECT_SEPARATOR: &'static str = "__";

	/// Create a non-empty `RoomName` without interpreting it.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseIdError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(name))
	}

	/// Name of the single support ticket room for `user` (e.g. `ticket_<id>`).
	pub fn ticket(user: &UserId) -> Self {
		Self(format!("{}{}", Self::TICKET_PREFIX, user.as_str()))
	}

	/// Name of the direct room between `a` and `b`.
	///
	/// The two identities are ordered lexicographically before joining, so
	/// both parties derive the same name regardless of who initiates.
	pub fn direct(a: &UserId, b: &UserId) -> Result<Self, ParseIdError> {
		if a == b {
			return Err(ParseIdError::InvalidFormat(
				"direct room requires two distinct participants".to_string(),
			));
		}
		let (lo, hi) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
		Ok(Self(format!(
			"{}{}{}{}",
			Self::DIRECT_PREFIX,
			lo.as_str(),
			Self::DIRECT_SEPARATOR,
			hi.as_str()
		)))
	}

	/// Classify this name back into its kind.
	pub fn kind(&self) -> RoomKind {
		if let Some(rest) = self.0.strip_prefix(Self::TICKET_PREFIX)
			&& let Ok(user) = UserId::new(rest)
		{
			return RoomKind::Ticket(user);
		}

		if let Some(rest) = self.0.strip_prefix(Self::DIRECT_PREFIX)
			&& let Some((a, b)) = rest.split_once(Self::DIRECT_SEPARATOR)
			&& let (Ok(a), Ok(b)) = (UserId::new(a), UserId::new(b))
		{
			return RoomKind::Direct(a, b);
		}

		RoomKind::Other
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomName {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomName::new(s.to_string())
	}
}

/// A provisioned conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
	pub id: RoomId,
	pub name: RoomName,
	pub created_by: UserId,
	/// Creation time, unix milliseconds.
	pub created_at_ms: i64,
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub room_id: RoomId,
	pub author: UserId,
	pub text: String,
	/// Creation time, unix milliseconds.
	pub created_at_ms: i64,
}

/// Maximum characters kept in a `RoomMeta` preview.
pub const PREVIEW_MAX_CHARS: usize = 70;

/// Derived latest-activity summary for a room. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
	/// Timestamp of the latest message, unix milliseconds.
	pub last_at_ms: i64,
	/// Truncated text of the latest message.
	pub preview: String,
	/// Author of the latest message.
	pub last_sender: UserId,
	pub unread: bool,
}

impl RoomMeta {
	/// Build the summary for a room whose latest message is `msg`.
	pub fn from_message(msg: &Message, unread: bool) -> Self {
		Self {
			last_at_ms: msg.created_at_ms,
			preview: bazaar_util::text::preview(&msg.text, PREVIEW_MAX_CHARS),
			last_sender: msg.author.clone(),
			unread,
		}
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	fn user(id: &str) -> UserId {
		UserId::new(id).expect("valid UserId")
	}

	#[test]
	fn ticket_name_roundtrip() {
		let u = user("d7e7f252-321c-48b8-ba5c-e1c3ca12940c");
		let name = RoomName::ticket(&u);
		assert_eq!(name.as_str(), "ticket_d7e7f252-321c-48b8-ba5c-e1c3ca12940c");
		assert_eq!(name.kind(), RoomKind::Ticket(u));
	}

	#[test]
	fn direct_name_is_order_independent() {
		let a = user("alice-id");
		let b = user("bob-id");
		let ab = RoomName::direct(&a, &b).unwrap();
		let ba = RoomName::direct(&b, &a).unwrap();
		assert_eq!(ab, ba);
		assert_eq!(ab.as_str(), "dm_alice-id__bob-id");
		assert_eq!(ab.kind(), RoomKind::Direct(a, b));
	}

	#[test]
	fn direct_name_rejects_same_participant() {
		let a = user("alice-id");
		assert!(RoomName::direct(&a, &a).is_err());
	}

	#[test]
	fn unprefixed_names_are_other() {
		assert_eq!(RoomName::new("general").unwrap().kind(), RoomKind::Other);
		assert_eq!(RoomName::new("ticket_").unwrap().kind(), RoomKind::Other);
		assert_eq!(RoomName::new("dm_only-one").unwrap().kind(), RoomKind::Other);
	}

	#[test]
	fn rejects_empty_ids_and_names() {
		assert!(UserId::new("").is_err());
		assert!(UserId::new("   ").is_err());
		assert!(RoomName::new("").is_err());
		assert!("".parse::<RoomId>().is_err());
		assert!("not-a-uuid".parse::<RoomId>().is_err());
	}

	#[test]
	fn room_meta_truncates_preview() {
		let msg = Message {
			id: MessageId::new_v4(),
			room_id: RoomId::new_v4(),
			author: user("u1"),
			text: "x".repeat(200),
			created_at_ms: 1_700_000_000_000,
		};
		let meta = RoomMeta::from_message(&msg, true);
		assert_eq!(meta.preview.chars().count(), PREVIEW_MAX_CHARS);
		assert!(meta.unread);
	}

	proptest! {
		#[test]
		fn direct_name_order_independent_for_all_ids(a in "[a-z0-9-]{1,32}", b in "[a-z0-9-]{1,32}") {
			prop_assume!(a != b);
			let ua = user(&a);
			let ub = user(&b);
			prop_assert_eq!(
				RoomName::direct(&ua, &ub).unwrap(),
				RoomName::direct(&ub, &ua).unwrap()
			);
		}

		#[test]
		fn ticket_kind_roundtrips_for_all_ids(id in "[a-z0-9-]{1,64}") {
			let u = user(&id);
			prop_assert_eq!(RoomName::ticket(&u).kind(), RoomKind::Ticket(u));
		}
	}
}
