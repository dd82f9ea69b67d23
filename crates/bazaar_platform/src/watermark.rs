#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context as _, anyhow};
use bazaar_domain::RoomId;
use tracing::{debug, warn};

use crate::WatermarkStore;

/// Default watermark path: `~/.bazaar/last_seen.toml`.
pub fn default_watermark_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".bazaar").join("last_seen.toml"))
}

/// Last-seen watermarks in a local TOML file, keyed by room id.
///
/// Owned by this machine's profile only; nothing synchronizes it across
/// devices, so another device can disagree about what is unread.
#[derive(Debug)]
pub struct FileWatermarks {
	path: PathBuf,
	map: Mutex<BTreeMap<String, i64>>,
}

impl FileWatermarks {
	/// Open (or start empty at) `path`.
	pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
		let path = path.into();
		let map = read_toml_if_exists(&path)
			.with_context(|| format!("read watermarks from {}", path.display()))?
			.unwrap_or_default();
		debug!(path = %path.display(), entries = map.len(), "loaded watermarks");
		Ok(Self {
			path,
			map: Mutex::new(map),
		})
	}

	fn persist(&self, map: &BTreeMap<String, i64>) {
		let Ok(body) = toml::to_string(map) else {
			warn!("failed to serialize watermarks");
			return;
		};
		if let Some(parent) = self.path.parent()
			&& let Err(e) = fs::create_dir_all(parent)
		{
			warn!(path = %self.path.display(), error = %e, "failed to create watermark directory");
			return;
		}
		if let Err(e) = fs::write(&self.path, body) {
			// Best effort; the in-memory value still applies for this process.
			warn!(path = %self.path.display(), error = %e, "failed to persist watermarks");
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<BTreeMap<String, i64>>> {
	match fs::read_to_string(path) {
		Ok(body) => {
			let map = toml::from_str(&body).with_context(|| format!("parse {}", path.display()))?;
			Ok(Some(map))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
	}
}

impl WatermarkStore for FileWatermarks {
	fn last_seen_ms(&self, room: RoomId) -> Option<i64> {
		self.map.lock().expect("watermark lock").get(&room.to_string()).copied()
	}

	fn mark_seen(&self, room: RoomId, now_ms: i64) {
		let mut map = self.map.lock().expect("watermark lock");
		map.insert(room.to_string(), now_ms);
		self.persist(&map);
	}
}
