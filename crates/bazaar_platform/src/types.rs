#![forbid(unsafe_code)]

use std::str::FromStr;

use bazaar_domain::{Message, MessageId, Room, RoomId, RoomName, UserId};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Raw `chat_rooms` row as returned by the store.
///
/// Every optional column carries an explicit fallback: a missing or
/// unparseable `created_at` becomes `0` ms.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomRow {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub created_by: String,
	#[serde(default)]
	pub created_at: Option<String>,
}

impl RoomRow {
	pub fn into_room(self) -> Result<Room, StoreError> {
		let id = RoomId::from_str(&self.id).map_err(|e| StoreError::Decode(format!("chat_rooms.id: {e}")))?;
		let name = RoomName::new(self.name).map_err(|e| StoreError::Decode(format!("chat_rooms.name: {e}")))?;
		let created_by = if self.created_by.trim().is_empty() {
			UserId::new("unknown").map_err(|e| StoreError::Decode(e.to_string()))?
		} else {
			UserId::new(self.created_by).map_err(|e| StoreError::Decode(format!("chat_rooms.created_by: {e}")))?
		};
		Ok(Room {
			id,
			name,
			created_by,
			created_at_ms: parse_timestamp_ms(self.created_at.as_deref()),
		})
	}
}

/// Raw `chat_messages` row as returned by the store or the change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRow {
	pub id: String,
	pub room_id: String,
	pub user_id: String,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub created_at: Option<String>,
}

impl MessageRow {
	pub fn into_message(self) -> Result<Message, StoreError> {
		let id = MessageId(
			uuid::Uuid::parse_str(self.id.trim())
				.map_err(|_| StoreError::Decode(format!("chat_messages.id: not a uuid: {}", self.id)))?,
		);
		let room_id =
			RoomId::from_str(&self.room_id).map_err(|e| StoreError::Decode(format!("chat_messages.room_id: {e}")))?;
		let author =
			UserId::new(self.user_id).map_err(|e| StoreError::Decode(format!("chat_messages.user_id: {e}")))?;
		Ok(Message {
			id,
			room_id,
			author,
			text: self.message,
			created_at_ms: parse_timestamp_ms(self.created_at.as_deref()),
		})
	}
}

/// Raw `profiles_public` row.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRow {
	pub id: String,
	#[serde(default)]
	pub display_name: Option<String>,
}

/// Insert payload for `chat_rooms`.
#[derive(Debug, Clone, Serialize)]
pub struct NewRoomRow {
	pub name: String,
	pub created_by: String,
}

/// Insert payload for `chat_messages`.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessageRow {
	pub room_id: String,
	pub user_id: String,
	pub message: String,
}

/// Parse an RFC 3339 timestamp column into unix milliseconds.
///
/// Fallback for missing/invalid values is `0`, which sorts before any real
/// message and never reads as unread against a watermark.
pub fn parse_timestamp_ms(raw: Option<&str>) -> i64 {
	let Some(raw) = raw else { return 0 };
	chrono::DateTime::parse_from_rfc3339(raw.trim())
		.map(|dt| dt.timestamp_millis())
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_rfc3339_timestamps() {
		assert_eq!(parse_timestamp_ms(Some("1970-01-01T00:00:01Z")), 1000);
		assert_eq!(parse_timestamp_ms(Some("2024-05-01T12:00:00+00:00")), 1_714_564_800_000);
	}

	#[test]
	fn invalid_timestamps_fall_back_to_zero() {
		assert_eq!(parse_timestamp_ms(None), 0);
		assert_eq!(parse_timestamp_ms(Some("")), 0);
		assert_eq!(parse_timestamp_ms(Some("yesterday")), 0);
	}

	#[test]
	fn message_row_decodes() {
		let row: MessageRow = serde_json::from_str(
			r#"{
				"id": "7f3f9276-9d3c-4f6a-9a30-3c1f9a9a0001",
				"room_id": "7f3f9276-9d3c-4f6a-9a30-3c1f9a9a0002",
				"user_id": "customer-1",
				"message": "hello",
				"created_at": "2024-05-01T12:00:00Z"
			}"#,
		)
		.unwrap();
		let msg = row.into_message().unwrap();
		assert_eq!(msg.text, "hello");
		assert_eq!(msg.author.as_str(), "customer-1");
		assert_eq!(msg.created_at_ms, 1_714_564_800_000);
	}

	#[test]
	fn message_row_defaults_optional_columns() {
		let row: MessageRow = serde_json::from_str(
			r#"{
				"id": "7f3f9276-9d3c-4f6a-9a30-3c1f9a9a0001",
				"room_id": "7f3f9276-9d3c-4f6a-9a30-3c1f9a9a0002",
				"user_id": "customer-1"
			}"#,
		)
		.unwrap();
		let msg = row.into_message().unwrap();
		assert_eq!(msg.text, "");
		assert_eq!(msg.created_at_ms, 0);
	}

	#[test]
	fn room_row_rejects_non_uuid_id() {
		let row = RoomRow {
			id: "not-a-uuid".to_string(),
			name: "ticket_u1".to_string(),
			created_by: "u1".to_string(),
			created_at: None,
		};
		assert!(matches!(row.into_room(), Err(StoreError::Decode(_))));
	}
}
