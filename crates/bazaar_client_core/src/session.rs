#![forbid(unsafe_code)]

use bazaar_domain::UserId;
use bazaar_platform::{AuthProvider, SecretString};
use tracing::debug;

use crate::{ClientConfig, ClientCoreError};

/// Resolved viewer identity for this process.
#[derive(Debug, Clone)]
pub struct Session {
	pub user_id: UserId,
	pub access_token: SecretString,
	/// Whether the viewer sees every conversation.
	pub is_operator: bool,
}

/// Resolve the current session, or `None` when nobody is signed in.
///
/// Role is decided here, once, from the injected operator set; downstream
/// code branches on `is_operator` and never re-checks identity.
pub async fn resolve_session(auth: &dyn AuthProvider, cfg: &ClientConfig) -> Result<Option<Session>, ClientCoreError> {
	let Some(session) = auth.session().await? else {
		return Ok(None);
	};

	let is_operator = cfg.is_operator(&session.user_id);
	debug!(user = %session.user_id, is_operator, "resolved session");

	Ok(Some(Session {
		user_id: session.user_id,
		access_token: session.access_token,
		is_operator,
	}))
}

#[cfg(test)]
mod tests {
	use bazaar_platform::memory::MemoryBackend;

	use super::*;

	fn user(id: &str) -> UserId {
		UserId::new(id).expect("valid UserId")
	}

	#[tokio::test]
	async fn none_when_signed_out() {
		let backend = MemoryBackend::new();
		let session = resolve_session(&backend, &ClientConfig::default()).await.unwrap();
		assert!(session.is_none());
	}

	#[tokio::test]
	async fn operator_flag_follows_config() {
		let backend = MemoryBackend::new();
		let op = user("op-1");
		let customer = user("cust-1");
		let cfg = ClientConfig::with_operator(op.clone());

		backend.sign_in(&op);
		let session = resolve_session(&backend, &cfg).await.unwrap().unwrap();
		assert!(session.is_operator);

		backend.sign_in(&customer);
		let session = resolve_session(&backend, &cfg).await.unwrap().unwrap();
		assert!(!session.is_operator);
	}
}
