#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bazaar_domain::{Message, RoomId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use crate::types::MessageRow;
use crate::{ChangeFeed, RoomSubscription};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Configuration for the websocket change-feed client.
#[derive(Debug, Clone)]
pub struct FeedConfig {
	/// Change-feed websocket URL (`wss://...`).
	pub url: String,
	/// Delay before re-dialing after a dropped connection.
	pub reconnect_delay: Duration,
}

impl FeedConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			reconnect_delay: DEFAULT_RECONNECT_DELAY,
		}
	}
}

/// Handle to the running change-feed task.
///
/// The task maintains one websocket connection, joins the topic of every
/// subscribed room, and re-joins all of them after a reconnect. Missed
/// events during the gap are not replayed; callers recover by reloading
/// the room.
#[derive(Clone)]
pub struct FeedClient {
	command_tx: mpsc::UnboundedSender<Command>,
	next_handler_id: Arc<AtomicU64>,
}

impl FeedClient {
	/// Spawn the feed task on the current tokio runtime.
	pub fn spawn(cfg: FeedConfig) -> Self {
		let (command_tx, command_rx) = mpsc::unbounded_channel();
		tokio::spawn(run_feed(cfg, command_rx));
		Self {
			command_tx,
			next_handler_id: Arc::new(AtomicU64::new(1)),
		}
	}
}

impl ChangeFeed for FeedClient {
	fn subscribe(&self, room: RoomId) -> RoomSubscription {
		let (tx, rx) = mpsc::unbounded_channel();
		let handler_id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);

		let _ = self.command_tx.send(Command::Subscribe {
			room,
			handler_id,
			handler: tx,
		});

		let guard = FeedGuard {
			room,
			handler_id,
			command_tx: self.command_tx.clone(),
		};
		RoomSubscription::new(room, rx, guard)
	}
}

struct FeedGuard {
	room: RoomId,
	handler_id: u64,
	command_tx: mpsc::UnboundedSender<Command>,
}

impl Drop for FeedGuard {
	fn drop(&mut self) {
		let _ = self.command_tx.send(Command::Unsubscribe {
			room: self.room,
			handler_id: self.handler_id,
		});
	}
}

#[derive(Debug)]
enum Command {
	Subscribe {
		room: RoomId,
		handler_id: u64,
		handler: mpsc::UnboundedSender<Message>,
	},
	Unsubscribe {
		room: RoomId,
		handler_id: u64,
	},
}

#[derive(Debug, Default)]
struct ManagerState {
	subscriptions: HashMap<RoomId, HashSet<u64>>,
	handlers: HashMap<u64, mpsc::UnboundedSender<Message>>,
}

impl ManagerState {
	/// Returns true when this is the first handler for the room.
	fn add_subscription(&mut self, room: RoomId, handler_id: u64, handler: mpsc::UnboundedSender<Message>) -> bool {
		self.handlers.insert(handler_id, handler);
		let is_new_room = !self.subscriptions.contains_key(&room);
		self.subscriptions.entry(room).or_default().insert(handler_id);
		is_new_room
	}

	/// Returns true when the room has no handlers left.
	fn remove_subscription(&mut self, room: RoomId, handler_id: u64) -> bool {
		self.handlers.remove(&handler_id);
		let Some(handlers) = self.subscriptions.get_mut(&room) else {
			return false;
		};

		let removed = handlers.remove(&handler_id);
		if handlers.is_empty() {
			self.subscriptions.remove(&room);
		}
		removed && !self.subscriptions.contains_key(&room)
	}

	fn dispatch(&mut self, room: RoomId, msg: &Message) {
		let Some(handler_ids) = self.subscriptions.get(&room) else {
			return;
		};
		let stale: Vec<u64> = handler_ids
			.iter()
			.copied()
			.filter(|id| match self.handlers.get(id) {
				Some(tx) => tx.send(msg.clone()).is_err(),
				None => true,
			})
			.collect();
		for id in stale {
			self.remove_subscription(room, id);
		}
	}
}

/// Room topic on the wire (`room:<uuid>`).
pub fn topic_for_room(room: RoomId) -> String {
	format!("room:{room}")
}

fn parse_topic(topic: &str) -> Option<RoomId> {
	RoomId::from_str(topic.strip_prefix("room:")?).ok()
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
	Join { topic: String },
	Leave { topic: String },
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
	topic: String,
	event: String,
	#[serde(default)]
	row: Option<MessageRow>,
}

async fn run_feed(cfg: FeedConfig, mut command_rx: mpsc::UnboundedReceiver<Command>) {
	let mut state = ManagerState::default();
	let mut commands_open = true;

	while commands_open {
		info!(url = %cfg.url, "connecting to change feed");
		let (mut ws, _) = match tokio_tungstenite::connect_async(cfg.url.as_str()).await {
			Ok(result) => result,
			Err(e) => {
				warn!(error = %e, "change feed connect failed");
				commands_open = drain_commands_while_down(&mut state, &mut command_rx, cfg.reconnect_delay).await;
				continue;
			}
		};

		// Re-join every room that still has handlers.
		let mut join_failed = false;
		for room in state.subscriptions.keys().copied().collect::<Vec<_>>() {
			if send_frame(&mut ws, &ClientFrame::Join { topic: topic_for_room(room) })
				.await
				.is_err()
			{
				join_failed = true;
				break;
			}
		}
		if join_failed {
			commands_open = drain_commands_while_down(&mut state, &mut command_rx, cfg.reconnect_delay).await;
			continue;
		}

		loop {
			tokio::select! {
				cmd = command_rx.recv() => {
					let Some(cmd) = cmd else {
						commands_open = false;
						let _ = ws.close(None).await;
						break;
					};

					match cmd {
						Command::Subscribe { room, handler_id, handler } => {
							if state.add_subscription(room, handler_id, handler)
								&& send_frame(&mut ws, &ClientFrame::Join { topic: topic_for_room(room) }).await.is_err()
							{
								break;
							}
						}
						Command::Unsubscribe { room, handler_id } => {
							if state.remove_subscription(room, handler_id)
								&& send_frame(&mut ws, &ClientFrame::Leave { topic: topic_for_room(room) }).await.is_err()
							{
								break;
							}
						}
					}
				}

				frame = ws.next() => {
					match frame {
						Some(Ok(tungstenite::Message::Text(text))) => handle_text_frame(&mut state, text.as_str()),
						Some(Ok(tungstenite::Message::Ping(payload))) => {
							if ws.send(tungstenite::Message::Pong(payload)).await.is_err() {
								break;
							}
						}
						Some(Ok(tungstenite::Message::Close(_))) | None => {
							debug!("change feed connection closed");
							break;
						}
						Some(Ok(_)) => {}
						Some(Err(e)) => {
							warn!(error = %e, "change feed read error");
							break;
						}
					}
				}
			}
		}

		if commands_open {
			commands_open = drain_commands_while_down(&mut state, &mut command_rx, cfg.reconnect_delay).await;
		}
	}

	debug!("change feed task stopped");
}

fn handle_text_frame(state: &mut ManagerState, text: &str) {
	let frame: ServerFrame = match serde_json::from_str(text) {
		Ok(frame) => frame,
		Err(e) => {
			warn!(error = %e, "undecodable change feed frame");
			return;
		}
	};

	if frame.event != "insert" {
		debug!(topic = %frame.topic, event = %frame.event, "ignoring non-insert feed event");
		return;
	}

	let Some(room) = parse_topic(&frame.topic) else {
		warn!(topic = %frame.topic, "change feed frame with unknown topic");
		return;
	};

	let Some(row) = frame.row else {
		warn!(topic = %frame.topic, "insert frame without row payload");
		return;
	};

	match row.into_message() {
		Ok(msg) => state.dispatch(room, &msg),
		Err(e) => warn!(topic = %frame.topic, error = %e, "dropping undecodable insert row"),
	}
}

async fn send_frame<S>(ws: &mut S, frame: &ClientFrame) -> Result<(), ()>
where
	S: SinkExt<tungstenite::Message> + Unpin,
	S::Error: std::fmt::Display,
{
	let text = serde_json::to_string(frame).expect("serializable frame");
	ws.send(tungstenite::Message::text(text)).await.map_err(|e| {
		warn!(error = %e, "change feed send failed");
	})
}

/// Keep absorbing subscribe/unsubscribe commands while disconnected, then
/// wait out the reconnect delay. Returns false when the command side hung up.
async fn drain_commands_while_down(
	state: &mut ManagerState,
	command_rx: &mut mpsc::UnboundedReceiver<Command>,
	delay: Duration,
) -> bool {
	let deadline = tokio::time::Instant::now() + delay;
	loop {
		tokio::select! {
			cmd = command_rx.recv() => {
				match cmd {
					Some(Command::Subscribe { room, handler_id, handler }) => {
						state.add_subscription(room, handler_id, handler);
					}
					Some(Command::Unsubscribe { room, handler_id }) => {
						state.remove_subscription(room, handler_id);
					}
					None => return false,
				}
			}
			_ = tokio::time::sleep_until(deadline) => return true,
		}
	}
}
