//! Store double that loses a configurable number of compare-and-swap races.

// self
use crate::{
	_prelude::*,
	auth::{EServiceId, TenantId},
	state::{LookupKey, PlatformStateEntry, PlatformStateKey, TokenGenStateEntry, TokenGenStateKey},
	store::{MemoryStore, PlatformStateStore, StoreFuture, TokenGenStateStore, WriteOutcome},
};

/// [`MemoryStore`] whose next `n` puts answer [`WriteOutcome::VersionConflict`].
#[derive(Debug, Default)]
pub(crate) struct ConflictingStore {
	pub(crate) inner: MemoryStore,
	pending: Mutex<u32>,
	puts: Mutex<u32>,
}
impl ConflictingStore {
	pub(crate) fn conflict_next(&self, puts: u32) {
		*self.pending.lock() = puts;
	}

	/// Puts attempted so far, lost or not.
	pub(crate) fn puts(&self) -> u32 {
		*self.puts.lock()
	}

	fn lose(&self) -> bool {
		*self.puts.lock() += 1;

		let mut pending = self.pending.lock();

		if *pending == 0 {
			return false;
		}

		*pending -= 1;

		true
	}
}
impl PlatformStateStore for ConflictingStore {
	fn get<'a>(&'a self, key: &'a PlatformStateKey) -> StoreFuture<'a, Option<PlatformStateEntry>> {
		PlatformStateStore::get(&self.inner, key)
	}

	fn put(
		&self,
		entry: PlatformStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		if self.lose() {
			return Box::pin(async { Ok(WriteOutcome::VersionConflict) });
		}

		PlatformStateStore::put(&self.inner, entry, expected)
	}

	fn delete<'a>(
		&'a self,
		key: &'a PlatformStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		PlatformStateStore::delete(&self.inner, key, expected)
	}

	fn find_agreements<'a>(
		&'a self,
		consumer: &'a TenantId,
		eservice: &'a EServiceId,
	) -> StoreFuture<'a, Vec<PlatformStateEntry>> {
		PlatformStateStore::find_agreements(&self.inner, consumer, eservice)
	}
}
impl TokenGenStateStore for ConflictingStore {
	fn get<'a>(&'a self, key: &'a TokenGenStateKey) -> StoreFuture<'a, Option<TokenGenStateEntry>> {
		TokenGenStateStore::get(&self.inner, key)
	}

	fn put(
		&self,
		entry: TokenGenStateEntry,
		expected: Option<u64>,
	) -> StoreFuture<'_, WriteOutcome> {
		if self.lose() {
			return Box::pin(async { Ok(WriteOutcome::VersionConflict) });
		}

		TokenGenStateStore::put(&self.inner, entry, expected)
	}

	fn delete<'a>(
		&'a self,
		key: &'a TokenGenStateKey,
		expected: u64,
	) -> StoreFuture<'a, WriteOutcome> {
		TokenGenStateStore::delete(&self.inner, key, expected)
	}

	fn query<'a>(&'a self, lookup: &'a LookupKey) -> StoreFuture<'a, Vec<TokenGenStateEntry>> {
		TokenGenStateStore::query(&self.inner, lookup)
	}
}
