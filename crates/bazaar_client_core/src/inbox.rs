#![forbid(unsafe_code)]

use std::collections::HashMap;

use bazaar_domain::{Message, Room, RoomId, RoomMeta, UserId};
use bazaar_platform::{DataStore, WatermarkStore};
use tracing::debug;

use crate::ClientCoreError;

/// One row of the operator inbox.
#[derive(Debug, Clone)]
pub struct InboxEntry {
	pub room: Room,
	/// Latest-activity summary, `None` when no message fell inside the
	/// bulk scan window.
	pub meta: Option<RoomMeta>,
}

impl InboxEntry {
	/// Sort key: latest message time, falling back to room creation time
	/// for rooms without one.
	fn recency_ms(&self) -> i64 {
		self.meta.as_ref().map(|m| m.last_at_ms).unwrap_or(self.room.created_at_ms)
	}
}

/// Build the inbox for `rooms` with one bulk query.
///
/// Fetches the most recent `scan_limit` messages across all rooms in one
/// descending scan and keeps the first row seen per room, which is that
/// room's latest message. A room whose latest message is older than the
/// whole window shows no summary; that trade is deliberate, one query
/// instead of one per room.
pub async fn compute_inbox(
	store: &dyn DataStore,
	watermarks: &dyn WatermarkStore,
	viewer: &UserId,
	rooms: Vec<Room>,
	scan_limit: usize,
) -> Result<Vec<InboxEntry>, ClientCoreError> {
	let ids: Vec<RoomId> = rooms.iter().map(|r| r.id).collect();
	let recent = store.recent_messages(&ids, scan_limit).await?;

	let mut latest: HashMap<RoomId, &Message> = HashMap::new();
	for msg in &recent {
		latest.entry(msg.room_id).or_insert(msg);
	}

	let mut entries: Vec<InboxEntry> = rooms
		.into_iter()
		.map(|room| {
			let meta = latest.get(&room.id).map(|msg| {
				let unread = is_unread(watermarks, viewer, msg);
				RoomMeta::from_message(msg, unread)
			});
			InboxEntry { room, meta }
		})
		.collect();

	sort_by_recency(&mut entries);
	debug!(rooms = entries.len(), scanned = recent.len(), "computed inbox");
	Ok(entries)
}

/// A message is unread when somebody else wrote it after this machine
/// last viewed the room. No watermark means nothing was ever viewed here.
pub fn is_unread(watermarks: &dyn WatermarkStore, viewer: &UserId, msg: &Message) -> bool {
	if &msg.author == viewer {
		return false;
	}
	msg.created_at_ms > watermarks.last_seen_ms(msg.room_id).unwrap_or(0)
}

/// Most recently active room first.
pub fn sort_by_recency(entries: &mut [InboxEntry]) {
	entries.sort_by_key(|e| std::cmp::Reverse(e.recency_ms()));
}

/// Update one room's entry in place from a live insert, then re-sort.
/// Rooms not already in the inbox are ignored; a refresh picks them up.
pub fn patch_meta(entries: &mut Vec<InboxEntry>, viewer: &UserId, watermarks: &dyn WatermarkStore, msg: &Message) {
	let Some(entry) = entries.iter_mut().find(|e| e.room.id == msg.room_id) else {
		return;
	};
	let unread = is_unread(watermarks, viewer, msg);
	entry.meta = Some(RoomMeta::from_message(msg, unread));
	sort_by_recency(entries);
}

/// Record that the viewer is looking at `room` right now.
pub fn mark_room_seen(watermarks: &dyn WatermarkStore, room: RoomId, now_ms: i64) {
	watermarks.mark_seen(room, now_ms);
}
