#![forbid(unsafe_code)]

use bazaar_domain::{Message, RoomId, UserId};
use bazaar_platform::{DataStore, NewMessage};
use tracing::debug;

use crate::ClientCoreError;

/// Load the transcript window for a room, oldest first.
pub async fn load_messages(store: &dyn DataStore, room: RoomId, limit: usize) -> Result<Vec<Message>, ClientCoreError> {
	let messages = store.messages_in_room(room, limit).await?;
	debug!(%room, count = messages.len(), "loaded transcript");
	Ok(messages)
}

/// Validate and persist an outgoing message.
///
/// Whitespace-only input is rejected before any store call. The stored
/// message is returned but never appended locally; the transcript picks it
/// up when the change feed echoes the insert, so every viewer renders the
/// same storage-ordered history.
pub async fn send_message(
	store: &dyn DataStore,
	room: RoomId,
	author: &UserId,
	text: &str,
) -> Result<Message, ClientCoreError> {
	let Some(trimmed) = bazaar_util::text::trimmed_non_empty(text) else {
		return Err(ClientCoreError::EmptyMessage);
	};

	let stored = store
		.insert_message(NewMessage {
			room_id: room,
			author: author.clone(),
			text: trimmed.to_string(),
		})
		.await?;
	debug!(%room, message = %stored.id, "stored message");
	Ok(stored)
}
