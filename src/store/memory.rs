//! Thread-safe in-memory store implementing both tables, for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{EServiceId, TenantId},
	state::{LookupKey, PlatformStateEntry, PlatformStateKey, TokenGenStateEntry, TokenGenStateKey},
	store::{PlatformStateStore, StoreFuture, TokenGenStateStore, WriteOutcome},
};

/// Both tables behind a single lock.
#[derive(Clone, Debug, Default)]
pub(crate) struct Tables {
	pub(crate) platform: HashMap<PlatformStateKey, PlatformStateEntry>,
	pub(crate) token_gen: HashMap<TokenGenStateKey, TokenGenStateEntry>,
}
impl Tables {
	pub(crate) fn put_platform(
		&mut self,
		entry: PlatformStateEntry,
		expected: Option<u64>,
	) -> WriteOutcome {
		let current = self.platform.get(&entry.key).map(|stored| stored.version);

		if current != expected {
			return WriteOutcome::VersionConflict;
		}

		self.platform.insert(entry.key.clone(), entry);

		WriteOutcome::Written
	}

	pub(crate) fn delete_platform(
		&mut self,
		key: &PlatformStateKey,
		expected: u64,
	) -> WriteOutcome {
		match self.platform.get(key) {
			Some(stored) if stored.version == expected => {
				self.platform.remove(key);

				WriteOutcome::Written
			},
			_ => WriteOutcome::VersionConflict,
		}
	}

	pub(crate) fn find_agreements(
		&self,
		consumer: &TenantId,
		eservice: &EServiceId,
	) -> Vec<PlatformStateEntry> {
		self.platform
			.values()
			.filter(|entry| entry.is_agreement_for(consumer, eservice))
			.cloned()
			.collect()
	}

	pub(crate) fn put_token_gen(
		&mut self,
		mut entry: TokenGenStateEntry,
		expected: Option<u64>,
	) -> WriteOutcome {
		let current = self.token_gen.get(&entry.key).map(|stored| stored.revision);

		if current != expected {
			return WriteOutcome::VersionConflict;
		}

		entry.revision = expected.map_or(1, |revision| revision + 1);
		self.token_gen.insert(entry.key.clone(), entry);

		WriteOutcome::Written
	}

	pub(crate) fn delete_token_gen(
		&mut self,
		key: &TokenGenStateKey,
		expected: u64,
	) -> WriteOutcome {
		match self.token_gen.get(key) {
			Some(stored) if stored.revision == expected => {
				self.token_gen.remove(key);

				WriteOutcome::Written
			},
			_ => WriteOutcome::VersionConflict,
		}
	}

	pub(crate) fn query(&self, lookup: &LookupKey) -> Vec<TokenGenStateEntry> {
		let mut entries = self
			.token_gen
			.values()
			.filter(|entry| entry.matches(lookup))
			.cloned()
			.collect::<Vec<_>>();

		entries.sort_by_key(|entry| entry.key.render());

		entries
	}
}

/// Thread-safe storage backend that keeps both tables in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);
impl MemoryStore {
	/// Number of platform-state entries currently stored.
	pub fn platform_len(&self) -> usize {
		self.0.read().platform.len()
	}

	/// Number of token-generation entries currently stored.
	pub fn token_gen_len(&self) -> usize {
		self.0.read().token_gen.len()
	}
}
impl PlatformStateStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a PlatformStateKey) -> StoreFuture<'a, Option<PlatformStateEntry>> {
		Box::pin(async move { Ok(self.0.read().platform.get(key).cloned()) })
	}

	fn put(
		&self,
		entry: PlatformStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		Box::pin(async move { Ok(self.0.write().put_platform(entry, expected)) })
	}

	fn delete<'a>(
		&'a self,
		key: &'a PlatformStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		Box::pin(async move { Ok(self.0.write().delete_platform(key, expected)) })
	}

	fn find_agreements<'a>(
		&'a self,
		consumer: &'a TenantId,
		eservice: &'a EServiceId,
	) -> StoreFuture<'a, Vec<PlatformStateEntry>> {
		Box::pin(async move { Ok(self.0.read().find_agreements(consumer, eservice)) })
	}
}
impl TokenGenStateStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a TokenGenStateKey) -> StoreFuture<'a, Option<TokenGenStateEntry>> {
		Box::pin(async move { Ok(self.0.read().token_gen.get(key).cloned()) })
	}

	fn put(
		&self,
		entry: TokenGenStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		Box::pin(async move { Ok(self.0.write().put_token_gen(entry, expected)) })
	}

	fn delete<'a>(
		&'a self,
		key: &'a TokenGenStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		Box::pin(async move { Ok(self.0.write().delete_token_gen(key, expected)) })
	}

	fn query<'a>(&'a self, lookup: &'a LookupKey) -> StoreFuture<'a, Vec<TokenGenStateEntry>> {
		Box::pin(async move { Ok(self.0.read().query(lookup)) })
	}
}
