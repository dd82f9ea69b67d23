#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use bazaar_domain::{Message, Room, RoomId, RoomName, UserId};
use bazaar_util::endpoint::BaseEndpoint;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{MessageRow, NewMessageRow, NewRoomRow, ProfileRow, RoomRow};
use crate::{
	AuthChange, AuthError, AuthProvider, AuthSession, DataStore, NewMessage, NotifyRelay, RelayError, SecretString,
	StoreError,
};

/// Configuration for the hosted-platform REST backend.
#[derive(Debug, Clone)]
pub struct RestConfig {
	/// Platform base endpoint (`https://<project>.example.com`).
	pub endpoint: BaseEndpoint,
	/// Public anon key sent as `apikey` on every request.
	pub anon_key: SecretString,
}

#[derive(Debug, Default)]
struct AuthState {
	access_token: Option<SecretString>,
	watchers: Vec<mpsc::UnboundedSender<AuthChange>>,
}

/// REST adapter for auth, the relational store and the notification relay.
///
/// Speaks the platform's PostgREST-style row API: filters are query
/// parameters (`name=eq.x`, `room_id=in.(..)`), inserts return the created
/// representation.
#[derive(Debug)]
pub struct RestBackend {
	cfg: RestConfig,
	client: reqwest::Client,
	auth: Mutex<AuthState>,
}

#[derive(Debug, Deserialize)]
struct AuthUserRow {
	id: String,
}

impl RestBackend {
	pub fn new(cfg: RestConfig) -> Self {
		Self {
			cfg,
			client: reqwest::Client::new(),
			auth: Mutex::new(AuthState::default()),
		}
	}

	/// Install the user's access token (from the hosting page / login flow).
	pub fn set_access_token(&self, token: SecretString) {
		let mut auth = self.auth.lock().expect("auth state lock");
		auth.access_token = Some(token);
	}

	fn access_token(&self) -> Option<SecretString> {
		self.auth.lock().expect("auth state lock").access_token.clone()
	}

	fn notify_watchers(&self, change: AuthChange) {
		let mut auth = self.auth.lock().expect("auth state lock");
		auth.watchers.retain(|tx| tx.send(change.clone()).is_ok());
	}

	fn rest_url(&self, table: &str) -> String {
		format!("{}/rest/v1/{table}", self.cfg.endpoint.url())
	}

	fn bearer(&self) -> String {
		match self.access_token() {
			Some(token) => format!("Bearer {}", token.expose()),
			None => format!("Bearer {}", self.cfg.anon_key.expose()),
		}
	}

	async fn select<T: serde::de::DeserializeOwned>(
		&self,
		table: &str,
		query: &[(&str, String)],
	) -> Result<Vec<T>, StoreError> {
		let resp = self
			.client
			.get(self.rest_url(table))
			.header("apikey", self.cfg.anon_key.expose())
			.header("Authorization", self.bearer())
			.query(query)
			.send()
			.await
			.map_err(|e| StoreError::Request(format!("select {table}: {e}")))?;

		let status = resp.status();
		if !status.is_success() {
			return Err(StoreError::Request(format!("select {table}: status={status}")));
		}

		resp.json::<Vec<T>>()
			.await
			.map_err(|e| StoreError::Decode(format!("select {table}: {e}")))
	}

	async fn insert<B: serde::Serialize, T: serde::de::DeserializeOwned>(
		&self,
		table: &str,
		body: &B,
	) -> Result<T, StoreError> {
		let resp = self
			.client
			.post(self.rest_url(table))
			.header("apikey", self.cfg.anon_key.expose())
			.header("Authorization", self.bearer())
			.header("Prefer", "return=representation")
			.json(body)
			.send()
			.await
			.map_err(|e| StoreError::Request(format!("insert {table}: {e}")))?;

		let status = resp.status();
		if status == StatusCode::CONFLICT {
			return Err(StoreError::UniqueViolation(format!("insert {table}")));
		}
		if !status.is_success() {
			return Err(StoreError::Request(format!("insert {table}: status={status}")));
		}

		let mut rows: Vec<T> = resp
			.json()
			.await
			.map_err(|e| StoreError::Decode(format!("insert {table}: {e}")))?;
		if rows.is_empty() {
			return Err(StoreError::Decode(format!("insert {table}: empty representation")));
		}
		Ok(rows.remove(0))
	}

	fn in_filter<I: fmt::Display>(values: impl IntoIterator<Item = I>) -> String {
		let quoted: Vec<String> = values.into_iter().map(|v| format!("\"{v}\"")).collect();
		format!("in.({})", quoted.join(","))
	}
}

#[async_trait]
impl AuthProvider for RestBackend {
	async fn session(&self) -> Result<Option<AuthSession>, AuthError> {
		let Some(token) = self.access_token() else {
			return Ok(None);
		};

		let resp = self
			.client
			.get(format!("{}/auth/v1/user", self.cfg.endpoint.url()))
			.header("apikey", self.cfg.anon_key.expose())
			.header("Authorization", format!("Bearer {}", token.expose()))
			.send()
			.await
			.map_err(|e| AuthError::Request(e.to_string()))?;

		let status = resp.status();
		if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			debug!(%status, "stored access token no longer valid");
			return Ok(None);
		}
		if !status.is_success() {
			return Err(AuthError::Request(format!("get user: status={status}")));
		}

		let user: AuthUserRow = resp.json().await.map_err(|e| AuthError::Decode(e.to_string()))?;
		let user_id = UserId::new(user.id).map_err(|e| AuthError::Decode(format!("user id: {e}")))?;

		Ok(Some(AuthSession {
			user_id,
			access_token: token,
		}))
	}

	async fn sign_out(&self) -> Result<(), AuthError> {
		let token = {
			let mut auth = self.auth.lock().expect("auth state lock");
			auth.access_token.take()
		};

		if let Some(token) = token {
			let resp = self
				.client
				.post(format!("{}/auth/v1/logout", self.cfg.endpoint.url()))
				.header("apikey", self.cfg.anon_key.expose())
				.header("Authorization", format!("Bearer {}", token.expose()))
				.send()
				.await;
			if let Err(e) = resp {
				// Local state is already cleared; the server session expires on its own.
				warn!(error = %e, "logout request failed");
			}
		}

		self.notify_watchers(AuthChange::SignedOut);
		Ok(())
	}

	fn auth_changes(&self) -> mpsc::UnboundedReceiver<AuthChange> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.auth.lock().expect("auth state lock").watchers.push(tx);
		rx
	}
}

#[async_trait]
impl DataStore for RestBackend {
	async fn room_by_name(&self, name: &RoomName) -> Result<Option<Room>, StoreError> {
		let rows: Vec<RoomRow> = self
			.select(
				"chat_rooms",
				&[
					("select", "id,name,created_by,created_at".to_string()),
					("name", format!("eq.{}", name.as_str())),
					("limit", "1".to_string()),
				],
			)
			.await?;
		rows.into_iter().next().map(RoomRow::into_room).transpose()
	}

	async fn insert_room(&self, name: &RoomName, created_by: &UserId) -> Result<Room, StoreError> {
		let row: RoomRow = self
			.insert(
				"chat_rooms",
				&[NewRoomRow {
					name: name.as_str().to_string(),
					created_by: created_by.as_str().to_string(),
				}],
			)
			.await?;
		row.into_room()
	}

	async fn rooms_with_prefix(&self, prefix: &str) -> Result<Vec<Room>, StoreError> {
		let rows: Vec<RoomRow> = self
			.select(
				"chat_rooms",
				&[
					("select", "id,name,created_by,created_at".to_string()),
					("name", format!("like.{prefix}*")),
				],
			)
			.await?;
		rows.into_iter().map(RoomRow::into_room).collect()
	}

	async fn messages_in_room(&self, room: RoomId, limit: usize) -> Result<Vec<Message>, StoreError> {
		let rows: Vec<MessageRow> = self
			.select(
				"chat_messages",
				&[
					("select", "id,room_id,user_id,message,created_at".to_string()),
					("room_id", format!("eq.{room}")),
					("order", "created_at.asc".to_string()),
					("limit", limit.to_string()),
				],
			)
			.await?;
		rows.into_iter().map(MessageRow::into_message).collect()
	}

	async fn recent_messages(&self, rooms: &[RoomId], limit: usize) -> Result<Vec<Message>, StoreError> {
		if rooms.is_empty() {
			return Ok(Vec::new());
		}
		let rows: Vec<MessageRow> = self
			.select(
				"chat_messages",
				&[
					("select", "id,room_id,user_id,message,created_at".to_string()),
					("room_id", Self::in_filter(rooms.iter())),
					("order", "created_at.desc".to_string()),
					("limit", limit.to_string()),
				],
			)
			.await?;
		rows.into_iter().map(MessageRow::into_message).collect()
	}

	async fn insert_message(&self, new: NewMessage) -> Result<Message, StoreError> {
		let row: MessageRow = self
			.insert(
				"chat_messages",
				&[NewMessageRow {
					room_id: new.room_id.to_string(),
					user_id: new.author.as_str().to_string(),
					message: new.text,
				}],
			)
			.await?;
		row.into_message()
	}

	async fn display_names(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>, StoreError> {
		if ids.is_empty() {
			return Ok(HashMap::new());
		}
		let rows: Vec<ProfileRow> = self
			.select(
				"profiles_public",
				&[
					("select", "id,display_name".to_string()),
					("id", Self::in_filter(ids.iter().map(|id| id.as_str()))),
				],
			)
			.await?;

		let mut names = HashMap::new();
		for row in rows {
			let Ok(id) = UserId::new(row.id) else { continue };
			if let Some(name) = row.display_name
				&& !name.trim().is_empty()
			{
				names.insert(id, name);
			}
		}
		Ok(names)
	}
}

#[async_trait]
impl NotifyRelay for RestBackend {
	async fn notify(&self, room_name: &RoomName, message: &str, bearer: &SecretString) -> Result<(), RelayError> {
		let resp = self
			.client
			.post(format!("{}/functions/v1/support-hook", self.cfg.endpoint.url()))
			.header("apikey", self.cfg.anon_key.expose())
			.header("Authorization", format!("Bearer {}", bearer.expose()))
			.json(&serde_json::json!({
				"room_name": room_name.as_str(),
				"message": message,
			}))
			.send()
			.await
			.map_err(|e| RelayError::Request(e.to_string()))?;

		let status = resp.status();
		if !status.is_success() {
			return Err(RelayError::Rejected(status.as_u16()));
		}
		Ok(())
	}
}
