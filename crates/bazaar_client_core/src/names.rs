#![forbid(unsafe_code)]

use std::collections::HashMap;

use bazaar_domain::UserId;
use bazaar_platform::DataStore;
use bazaar_util::text::short_id;
use tracing::warn;

/// Cache of display names for message authors.
///
/// Every id gets a label immediately (`User <short id>`); profile lookups
/// then upgrade labels in the background. A lookup failure keeps the
/// fallback labels and is never fatal.
#[derive(Debug, Default)]
pub struct NameCache {
	labels: HashMap<UserId, String>,
}

impl NameCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Label for `id`, falling back to a truncated-id placeholder.
	pub fn label(&self, id: &UserId) -> String {
		match self.labels.get(id) {
			Some(name) => name.clone(),
			None => fallback_label(id),
		}
	}

	pub fn contains(&self, id: &UserId) -> bool {
		self.labels.contains_key(id)
	}

	/// Fetch display names for any of `ids` not cached yet.
	pub async fn warm(&mut self, store: &dyn DataStore, ids: &[UserId]) {
		let missing: Vec<UserId> = ids.iter().filter(|id| !self.labels.contains_key(id)).cloned().collect();
		if missing.is_empty() {
			return;
		}

		match store.display_names(&missing).await {
			Ok(found) => {
				for id in missing {
					let label = found.get(&id).cloned().unwrap_or_else(|| fallback_label(&id));
					self.labels.insert(id, label);
				}
			}
			Err(e) => {
				// Leave ids uncached so a later warm can retry.
				warn!(error = %e, "display name lookup failed");
			}
		}
	}
}

fn fallback_label(id: &UserId) -> String {
	format!("User {}", short_id(id.as_str()))
}
