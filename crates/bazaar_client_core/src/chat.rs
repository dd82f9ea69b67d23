#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::anyhow;
use bazaar_domain::{Message, Room, RoomId, RoomName, UserId};
use bazaar_platform::{AuthChange, AuthProvider, ChangeFeed, DataStore, NotifyRelay, WatermarkStore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::inbox::{self, InboxEntry};
use crate::names::NameCache;
use crate::subscription::ActiveSubscription;
use crate::{ClientConfig, ClientCoreError, Session, messages, rooms, session};

/// Commands accepted by the chat task.
#[derive(Debug)]
pub enum ChatCommand {
	/// Open the chat panel: resolve the session, provision what the
	/// viewer's role needs and select a room.
	Open,
	/// Open (provisioning if needed) the room with this exact name.
	OpenByName(RoomName),
	/// Open (provisioning if needed) the direct room with another user.
	OpenDirect(UserId),
	/// Switch to a room already known to the task.
	SelectRoom(RoomId),
	/// Validate, store and (for customers) relay an outgoing message.
	SendMessage(String),
	/// Operator-only: provision an ad-hoc named room and select it.
	CreateRoom(RoomName),
	/// Operator-only: recompute the inbox from storage.
	RefreshInbox,
	/// Close the panel. The live subscription stays up so the unread
	/// badge keeps counting.
	Close,
}

/// Events emitted by the chat task.
#[derive(Debug)]
pub enum ChatEvent {
	/// Nobody is signed in; the caller should prompt for login.
	SessionRequired,
	RoomOpened(Room),
	TranscriptLoaded { room_id: RoomId, messages: Vec<RenderedMessage> },
	/// A live insert for the currently open room.
	MessageAppended { room_id: RoomId, message: RenderedMessage },
	InboxUpdated(Vec<InboxEntry>),
	/// Count of messages from others that arrived while the panel was
	/// closed. Emitted with 0 on open and close.
	UnreadBadge(u32),
	Notice(String),
	/// Something non-fatal went wrong; the task keeps running.
	Warning(String),
	AuthChanged(AuthChange),
}

/// A message with presentation fields resolved for the current viewer.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
	pub message: Message,
	pub author_label: String,
	/// The viewer wrote this message.
	pub mine: bool,
	/// An operator wrote this message.
	pub from_support: bool,
}

/// Collaborators for the chat task.
#[derive(Clone)]
pub struct ChatDeps {
	pub auth: Arc<dyn AuthProvider>,
	pub store: Arc<dyn DataStore>,
	pub feed: Arc<dyn ChangeFeed>,
	pub relay: Arc<dyn NotifyRelay>,
	pub watermarks: Arc<dyn WatermarkStore>,
	pub config: ClientConfig,
}

/// Handle to the running chat task.
///
/// Commands are fire-and-forget; outcomes come back as [`ChatEvent`]s.
/// Dropping the controller stops the task.
pub struct ChatController {
	command_tx: mpsc::UnboundedSender<ChatCommand>,
	event_rx: mpsc::UnboundedReceiver<ChatEvent>,
}

impl ChatController {
	fn send(&self, command: ChatCommand) -> anyhow::Result<()> {
		self.command_tx.send(command).map_err(|_| anyhow!("chat task is not running"))
	}

	pub fn open(&self) -> anyhow::Result<()> {
		self.send(ChatCommand::Open)
	}

	pub fn open_by_name(&self, name: RoomName) -> anyhow::Result<()> {
		self.send(ChatCommand::OpenByName(name))
	}

	pub fn open_direct(&self, other: UserId) -> anyhow::Result<()> {
		self.send(ChatCommand::OpenDirect(other))
	}

	pub fn select_room(&self, room: RoomId) -> anyhow::Result<()> {
		self.send(ChatCommand::SelectRoom(room))
	}

	pub fn send_message(&self, text: impl Into<String>) -> anyhow::Result<()> {
		self.send(ChatCommand::SendMessage(text.into()))
	}

	pub fn create_room(&self, name: RoomName) -> anyhow::Result<()> {
		self.send(ChatCommand::CreateRoom(name))
	}

	pub fn refresh_inbox(&self) -> anyhow::Result<()> {
		self.send(ChatCommand::RefreshInbox)
	}

	pub fn close(&self) -> anyhow::Result<()> {
		self.send(ChatCommand::Close)
	}

	/// Next event from the task, or `None` when the task stopped.
	pub async fn recv_event(&mut self) -> Option<ChatEvent> {
		self.event_rx.recv().await
	}

	pub fn try_recv_event(&mut self) -> Option<ChatEvent> {
		self.event_rx.try_recv().ok()
	}
}

/// Spawn the chat task on the current tokio runtime.
pub fn start_chat(deps: ChatDeps) -> ChatController {
	let (command_tx, command_rx) = mpsc::unbounded_channel();
	let (event_tx, event_rx) = mpsc::unbounded_channel();
	tokio::spawn(run_chat_task(deps, command_rx, event_tx));
	ChatController { command_tx, event_rx }
}

struct ChatTask {
	deps: ChatDeps,
	events: mpsc::UnboundedSender<ChatEvent>,
	session: Option<Session>,
	panel_open: bool,
	unread_badge: u32,
	current_room: Option<Room>,
	inbox: Vec<InboxEntry>,
	names: NameCache,
	active: ActiveSubscription,
}

async fn run_chat_task(
	deps: ChatDeps,
	mut command_rx: mpsc::UnboundedReceiver<ChatCommand>,
	event_tx: mpsc::UnboundedSender<ChatEvent>,
) {
	let mut auth_rx = deps.auth.auth_changes();
	let mut auth_open = true;

	let mut task = ChatTask {
		deps,
		events: event_tx,
		session: None,
		panel_open: false,
		unread_badge: 0,
		current_room: None,
		inbox: Vec::new(),
		names: NameCache::new(),
		active: ActiveSubscription::new(),
	};

	loop {
		tokio::select! {
			command = command_rx.recv() => {
				let Some(command) = command else {
					break;
				};
				if let Err(e) = task.handle_command(command).await {
					task.report(e);
				}
			}

			insert = task.active.recv(), if task.active.is_live() => {
				match insert {
					Some(msg) => task.handle_insert(msg).await,
					None => {
						warn!("room feed ended unexpectedly");
						task.active.clear();
						task.emit(ChatEvent::Warning("live updates stopped for this room".to_string()));
					}
				}
			}

			change = auth_rx.recv(), if auth_open => {
				match change {
					Some(change) => task.handle_auth_change(change),
					None => auth_open = false,
				}
			}
		}
	}

	debug!("chat task stopped");
}

impl ChatTask {
	fn emit(&self, event: ChatEvent) {
		let _ = self.events.send(event);
	}

	fn report(&self, e: ClientCoreError) {
		match e {
			ClientCoreError::SessionRequired => self.emit(ChatEvent::SessionRequired),
			other => {
				warn!(error = %other, "chat command failed");
				self.emit(ChatEvent::Warning(other.to_string()));
			}
		}
	}

	fn session(&self) -> Result<&Session, ClientCoreError> {
		self.session.as_ref().ok_or(ClientCoreError::SessionRequired)
	}

	async fn handle_command(&mut self, command: ChatCommand) -> Result<(), ClientCoreError> {
		match command {
			ChatCommand::Open => self.open().await,
			ChatCommand::OpenByName(name) => self.open_by_name(name).await,
			ChatCommand::OpenDirect(other) => self.open_direct(other).await,
			ChatCommand::SelectRoom(room) => self.select_known_room(room).await,
			ChatCommand::SendMessage(text) => self.send(text).await,
			ChatCommand::CreateRoom(name) => self.create_room(name).await,
			ChatCommand::RefreshInbox => self.refresh_inbox().await,
			ChatCommand::Close => {
				self.panel_open = false;
				self.unread_badge = 0;
				self.emit(ChatEvent::UnreadBadge(0));
				Ok(())
			}
		}
	}

	async fn open(&mut self) -> Result<(), ClientCoreError> {
		let Some(session) = session::resolve_session(self.deps.auth.as_ref(), &self.deps.config).await? else {
			self.emit(ChatEvent::SessionRequired);
			return Ok(());
		};
		info!(user = %session.user_id, is_operator = session.is_operator, "opening chat panel");
		self.session = Some(session.clone());
		self.panel_open = true;
		self.unread_badge = 0;
		self.emit(ChatEvent::UnreadBadge(0));

		if session.is_operator {
			self.refresh_inbox().await?;
			if let Some(entry) = self.inbox.first() {
				let room = entry.room.clone();
				self.select_room(room).await?;
			}
		} else {
			let room = rooms::ensure_ticket_room(self.deps.store.as_ref(), &session.user_id).await?;
			self.select_room(room).await?;
		}
		Ok(())
	}

	async fn open_by_name(&mut self, name: RoomName) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		if !session.is_operator && name != RoomName::ticket(&session.user_id) {
			return Err(ClientCoreError::NotAllowed(format!("cannot open room {name}")));
		}
		let room = rooms::ensure_room(self.deps.store.as_ref(), &name, &session.user_id).await?;
		self.select_room(room).await
	}

	async fn open_direct(&mut self, other: UserId) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		let room = rooms::ensure_direct_room(self.deps.store.as_ref(), &session.user_id, &other).await?;
		self.select_room(room).await
	}

	async fn select_known_room(&mut self, room_id: RoomId) -> Result<(), ClientCoreError> {
		let known = self
			.inbox
			.iter()
			.map(|e| &e.room)
			.chain(self.current_room.as_ref())
			.find(|r| r.id == room_id)
			.cloned();
		match known {
			Some(room) => self.select_room(room).await,
			None => {
				self.emit(ChatEvent::Warning(format!("unknown room: {room_id}")));
				Ok(())
			}
		}
	}

	async fn select_room(&mut self, room: Room) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		let history = messages::load_messages(self.deps.store.as_ref(), room.id, self.deps.config.message_load_limit).await?;

		let authors: Vec<UserId> = history.iter().map(|m| m.author.clone()).collect();
		self.names.warm(self.deps.store.as_ref(), &authors).await;

		// Seen through the newest message we are about to render.
		let seen_ms = history.last().map(|m| m.created_at_ms).unwrap_or(room.created_at_ms);
		inbox::mark_room_seen(self.deps.watermarks.as_ref(), room.id, seen_ms);
		if let Some(entry) = self.inbox.iter_mut().find(|e| e.room.id == room.id)
			&& let Some(meta) = entry.meta.as_mut()
			&& meta.unread
		{
			meta.unread = false;
			self.emit(ChatEvent::InboxUpdated(self.inbox.clone()));
		}

		self.active.switch_to(self.deps.feed.as_ref(), room.id);
		self.current_room = Some(room.clone());

		let rendered = history.iter().map(|m| self.render(&session, m)).collect();
		self.emit(ChatEvent::RoomOpened(room.clone()));
		self.emit(ChatEvent::TranscriptLoaded {
			room_id: room.id,
			messages: rendered,
		});
		Ok(())
	}

	async fn send(&mut self, text: String) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		let Some(room) = self.current_room.clone() else {
			self.emit(ChatEvent::Warning("no room selected".to_string()));
			return Ok(());
		};

		let stored = messages::send_message(self.deps.store.as_ref(), room.id, &session.user_id, &text).await?;

		// Customers alert the support side out of band. The message is
		// already stored, so a relay failure must not fail the send.
		if !session.is_operator
			&& let Err(e) = self
				.deps
				.relay
				.notify(&room.name, &stored.text, &session.access_token)
				.await
		{
			warn!(room = %room.name, error = %e, "support alert failed");
			self.emit(ChatEvent::Warning("message sent, but the support team was not alerted".to_string()));
		}
		Ok(())
	}

	async fn create_room(&mut self, name: RoomName) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		let room = rooms::create_room(self.deps.store.as_ref(), &session, &name).await?;
		self.emit(ChatEvent::Notice(format!("room {} is ready", room.name)));
		self.select_room(room).await
	}

	async fn refresh_inbox(&mut self) -> Result<(), ClientCoreError> {
		let session = self.session()?.clone();
		if !session.is_operator {
			return Err(ClientCoreError::NotAllowed("only operators have an inbox".to_string()));
		}

		let rooms = rooms::operator_rooms(self.deps.store.as_ref()).await?;
		let entries = inbox::compute_inbox(
			self.deps.store.as_ref(),
			self.deps.watermarks.as_ref(),
			&session.user_id,
			rooms,
			self.deps.config.inbox_scan_limit,
		)
		.await?;

		let senders: Vec<UserId> = entries
			.iter()
			.filter_map(|e| e.meta.as_ref().map(|m| m.last_sender.clone()))
			.collect();
		self.names.warm(self.deps.store.as_ref(), &senders).await;

		self.inbox = entries;
		self.emit(ChatEvent::InboxUpdated(self.inbox.clone()));
		Ok(())
	}

	async fn handle_insert(&mut self, msg: Message) {
		let Some(session) = self.session.clone() else {
			return;
		};
		self.names.warm(self.deps.store.as_ref(), std::slice::from_ref(&msg.author)).await;

		let mine = msg.author == session.user_id;
		let in_current = self.current_room.as_ref().is_some_and(|r| r.id == msg.room_id);

		if self.panel_open && in_current {
			inbox::mark_room_seen(self.deps.watermarks.as_ref(), msg.room_id, msg.created_at_ms);
			let rendered = self.render(&session, &msg);
			self.emit(ChatEvent::MessageAppended {
				room_id: msg.room_id,
				message: rendered,
			});
		} else if !mine {
			self.unread_badge += 1;
			self.emit(ChatEvent::UnreadBadge(self.unread_badge));
		}

		if session.is_operator && !self.inbox.is_empty() {
			inbox::patch_meta(&mut self.inbox, &session.user_id, self.deps.watermarks.as_ref(), &msg);
			self.emit(ChatEvent::InboxUpdated(self.inbox.clone()));
		}
	}

	fn handle_auth_change(&mut self, change: AuthChange) {
		info!(?change, "auth state changed, resetting chat state");
		self.session = None;
		self.panel_open = false;
		self.unread_badge = 0;
		self.current_room = None;
		self.inbox.clear();
		self.active.clear();

		let signed_out = change == AuthChange::SignedOut;
		self.emit(ChatEvent::AuthChanged(change));
		if signed_out {
			self.emit(ChatEvent::SessionRequired);
		}
	}

	fn render(&self, session: &Session, msg: &Message) -> RenderedMessage {
		let from_support = self.deps.config.is_operator(&msg.author);
		let author_label = if from_support && !session.is_operator {
			self.deps.config.support_display_name.clone()
		} else {
			self.names.label(&msg.author)
		};
		RenderedMessage {
			message: msg.clone(),
			author_label,
			mine: msg.author == session.user_id,
			from_support,
		}
	}
}
