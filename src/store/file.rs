//! Simple file-backed store for single-node deployments and demos.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{EServiceId, TenantId},
	state::{LookupKey, PlatformStateEntry, PlatformStateKey, TokenGenStateEntry, TokenGenStateKey},
	store::{
		PlatformStateStore, StoreError, StoreFuture, TokenGenStateStore, WriteOutcome,
		memory::Tables,
	},
};

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
	#[serde(default)]
	platform: Vec<PlatformStateEntry>,
	#[serde(default)]
	token_gen: Vec<TokenGenStateEntry>,
}

/// Persists both tables to a JSON file after each applied mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Tables>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let tables = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(tables)) })
	}

	/// Writes the current contents to disk.
	pub fn flush(&self) -> Result<(), StoreError> {
		let guard = self.inner.read();

		self.persist_locked(&guard)
	}

	fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
		if !path.exists() {
			return Ok(Tables::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Tables::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let snapshot: Snapshot =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(Tables {
			platform: snapshot.platform.into_iter().map(|e| (e.key.clone(), e)).collect(),
			token_gen: snapshot.token_gen.into_iter().map(|e| (e.key.clone(), e)).collect(),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, tables: &Tables) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let mut snapshot = Snapshot {
			platform: tables.platform.values().cloned().collect(),
			token_gen: tables.token_gen.values().cloned().collect(),
		};

		snapshot.platform.sort_by_key(|e| e.key.render());
		snapshot.token_gen.sort_by_key(|e| e.key.render());

		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate(
		&self,
		f: impl FnOnce(&mut Tables) -> WriteOutcome,
	) -> Result<WriteOutcome, StoreError> {
		let mut guard = self.inner.write();
		let outcome = f(&mut guard);

		if outcome == WriteOutcome::Written {
			self.persist_locked(&guard)?;
		}

		Ok(outcome)
	}
}
impl PlatformStateStore for FileStore {
	fn get<'a>(&'a self, key: &'a PlatformStateKey) -> StoreFuture<'a, Option<PlatformStateEntry>> {
		Box::pin(async move { Ok(self.inner.read().platform.get(key).cloned()) })
	}

	fn put(
		&self,
		entry: PlatformStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		Box::pin(async move { self.mutate(|tables| tables.put_platform(entry, expected)) })
	}

	fn delete<'a>(
		&'a self,
		key: &'a PlatformStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		Box::pin(async move { self.mutate(|tables| tables.delete_platform(key, expected)) })
	}

	fn find_agreements<'a>(
		&'a self,
		consumer: &'a TenantId,
		eservice: &'a EServiceId,
	) -> StoreFuture<'a, Vec<PlatformStateEntry>> {
		Box::pin(async move { Ok(self.inner.read().find_agreements(consumer, eservice)) })
	}
}
impl TokenGenStateStore for FileStore {
	fn get<'a>(&'a self, key: &'a TokenGenStateKey) -> StoreFuture<'a, Option<TokenGenStateEntry>> {
		Box::pin(async move { Ok(self.inner.read().token_gen.get(key).cloned()) })
	}

	fn put(
		&self,
		entry: TokenGenStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		Box::pin(async move { self.mutate(|tables| tables.put_token_gen(entry, expected)) })
	}

	fn delete<'a>(
		&'a self,
		key: &'a TokenGenStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		Box::pin(async move { self.mutate(|tables| tables.delete_token_gen(key, expected)) })
	}

	fn query<'a>(&'a self, lookup: &'a LookupKey) -> StoreFuture<'a, Vec<TokenGenStateEntry>> {
		Box::pin(async move { Ok(self.inner.read().query(lookup)) })
	}
}
