//! Storage contracts and built-in backends for the platform-state and token-generation tables.
//!
//! Both tables offer point reads, version-conditioned writes, and the secondary lookups the
//! projection writers need for fan-out. Token issuance only ever performs point reads.

pub mod file;
pub mod memory;
#[cfg(test)] pub(crate) mod testing;

pub use file::FileStore;
pub use memory::MemoryStore;

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	auth::{EServiceId, TenantId},
	state::{LookupKey, PlatformStateEntry, PlatformStateKey, TokenGenStateEntry, TokenGenStateKey},
};

/// Boxed future returned by store contracts.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Platform-state table contract.
pub trait PlatformStateStore
where
	Self: Send + Sync,
{
	/// Fetches the entry stored under `key`, if present.
	fn get<'a>(&'a self, key: &'a PlatformStateKey) -> StoreFuture<'a, Option<PlatformStateEntry>>;

	/// Writes `entry` if the stored version equals `expected` (`None` means "must not exist").
	fn put(
		&self,
		entry: PlatformStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome>;

	/// Deletes the entry under `key` if its stored version equals `expected`.
	fn delete<'a>(
		&'a self,
		key: &'a PlatformStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome>;

	/// Lists agreement entries for the consumer and e-service (`consumerId#eserviceId` index).
	fn find_agreements<'a>(
		&'a self,
		consumer: &'a TenantId,
		eservice: &'a EServiceId,
	) -> StoreFuture<'a, Vec<PlatformStateEntry>>;
}

/// Token-generation table contract.
pub trait TokenGenStateStore
where
	Self: Send + Sync,
{
	/// Fetches the entry stored under `key`, if present.
	fn get<'a>(&'a self, key: &'a TokenGenStateKey) -> StoreFuture<'a, Option<TokenGenStateEntry>>;

	/// Writes `entry` if the stored revision equals `expected` (`None` means "must not exist").
	///
	/// The store assigns the new revision: `expected + 1`, or `1` for a created entry.
	fn put(
		&self,
		entry: TokenGenStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome>;

	/// Deletes the entry under `key` if its stored revision equals `expected`.
	fn delete<'a>(
		&'a self,
		key: &'a TokenGenStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome>;

	/// Lists every entry reachable through the secondary lookup key.
	fn query<'a>(&'a self, lookup: &'a LookupKey) -> StoreFuture<'a, Vec<TokenGenStateEntry>>;
}

/// Result of a version-conditioned write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
	/// The precondition held and the write was applied.
	Written,
	/// The stored version differs from the expected one (or the key vanished).
	VersionConflict,
}

/// Error type produced by store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Backend selection for [`StoreClient::connect`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
	/// Process-local tables.
	#[default]
	Memory,
	/// JSON snapshot file holding both tables.
	File {
		/// Snapshot path.
		path: PathBuf,
	},
}

/// Explicitly constructed handles to both tables, shared by writers and the issuer.
#[derive(Clone)]
pub struct StoreClient {
	/// Platform-state table.
	pub platform: Arc<dyn PlatformStateStore>,
	/// Token-generation table.
	pub token_gen: Arc<dyn TokenGenStateStore>,
	file: Option<FileStore>,
}
impl StoreClient {
	/// Wraps caller-provided table handles.
	pub fn new(
		platform: Arc<dyn PlatformStateStore>,
		token_gen: Arc<dyn TokenGenStateStore>,
	) -> Self {
		Self { platform, token_gen, file: None }
	}

	/// Opens the configured backend.
	pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
		match config {
			StoreConfig::Memory => {
				let store = Arc::new(MemoryStore::default());

				Ok(Self::new(store.clone(), store))
			},
			StoreConfig::File { path } => {
				let store = FileStore::open(path)?;
				let shared = Arc::new(store.clone());

				Ok(Self { platform: shared.clone(), token_gen: shared, file: Some(store) })
			},
		}
	}

	/// Persists outstanding state and releases the handles.
	pub fn close(self) -> Result<(), StoreError> {
		if let Some(store) = self.file {
			store.flush()?;
		}

		Ok(())
	}
}
impl Debug for StoreClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StoreClient").field("file_backed", &self.file.is_some()).finish()
	}
}
