#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use bazaar_domain::{ParseIdError, UserId};
use bazaar_platform::{AuthError, StoreError};

pub mod chat;
pub mod inbox;
pub mod messages;
pub mod names;
pub mod rooms;
pub mod session;
pub mod subscription;

#[cfg(test)]
mod chat_tests;

pub use chat::{ChatCommand, ChatController, ChatDeps, ChatEvent, RenderedMessage, start_chat};
pub use session::Session;

/// Default bound on a single room's transcript window.
pub const DEFAULT_MESSAGE_LOAD_LIMIT: usize = 300;

/// Default bound on the bulk inbox scan across all rooms.
pub const DEFAULT_INBOX_SCAN_LIMIT: usize = 800;

/// Client configuration (v1).
///
/// The privileged identities are injected here rather than hardcoded; a
/// viewer is an operator exactly when their id is in `operator_ids`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Identities allowed to see every conversation.
	pub operator_ids: BTreeSet<UserId>,

	/// Label shown to customers for operator messages.
	pub support_display_name: String,

	/// Maximum messages loaded for one room transcript.
	pub message_load_limit: usize,

	/// Maximum rows fetched by the bulk inbox scan. Rooms whose latest
	/// message falls outside this window report "no messages yet" even
	/// when older history exists.
	pub inbox_scan_limit: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			operator_ids: BTreeSet::new(),
			support_display_name: "Bazaar Support".to_string(),
			message_load_limit: DEFAULT_MESSAGE_LOAD_LIMIT,
			inbox_scan_limit: DEFAULT_INBOX_SCAN_LIMIT,
		}
	}
}

impl ClientConfig {
	pub fn with_operator(operator: UserId) -> Self {
		Self {
			operator_ids: BTreeSet::from([operator]),
			..Self::default()
		}
	}

	pub fn is_operator(&self, user: &UserId) -> bool {
		self.operator_ids.contains(user)
	}
}

/// Errors for client core operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientCoreError {
	/// No authenticated identity; callers prompt for login.
	#[error("not signed in")]
	SessionRequired,

	/// The viewer is not allowed to perform this operation.
	#[error("not allowed: {0}")]
	NotAllowed(String),

	/// Rejected locally before any network call.
	#[error("message must not be empty")]
	EmptyMessage,

	#[error(transparent)]
	InvalidName(#[from] ParseIdError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Auth(#[from] AuthError),
}
