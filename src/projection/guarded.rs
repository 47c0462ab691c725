//! Version-guarded writes to the platform-state table.

// self
use crate::{
	_prelude::*,
	config::RetryPolicy,
	error::TransientError,
	obs,
	projection::pause,
	state::{ItemState, PlatformStateData, PlatformStateEntry, PlatformStateKey},
	store::{PlatformStateStore, WriteOutcome},
};

/// Change an event requests for one platform-state entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
	/// Create or overwrite the entry.
	Upsert {
		/// Derived authorization state.
		state: ItemState,
		/// Entity-specific attributes.
		data: PlatformStateData,
	},
	/// Remove the entry.
	Delete,
}

/// Store operation chosen for an event given the currently stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
	/// Write `entry`, conditioned on the stored version.
	Put {
		/// Entry to store.
		entry: PlatformStateEntry,
		/// Version the store must still hold (`None` when absent).
		expected: Option<u64>,
	},
	/// Delete the entry, conditioned on the stored version.
	Delete {
		/// Key to remove.
		key: PlatformStateKey,
		/// Version the store must still hold.
		expected: u64,
	},
	/// Deletion of an entry that does not exist.
	Absent,
	/// The event is not newer than the stored entry.
	Stale {
		/// Version currently stored.
		stored: u64,
	},
}

/// Result of [`apply_guarded`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardedOutcome {
	/// The entry was created or overwritten.
	Written,
	/// The entry was removed.
	Deleted,
	/// A delete found nothing to remove.
	Absent,
	/// The stored entry carries exactly the event's version.
	Duplicate,
	/// The stored entry is newer than the event.
	Stale,
}

/// Decides what an event at `version` does to the currently stored entry.
///
/// A stored version greater than or equal to the incoming one wins; everything else goes through.
/// The table keeps no tombstones, so once an entry is deleted any later upsert recreates it,
/// whatever its version.
pub fn transition(
	current: Option<&PlatformStateEntry>,
	key: &PlatformStateKey,
	version: u64,
	change: &Change,
	now: OffsetDateTime,
) -> Transition {
	match (current, change) {
		(Some(stored), _) if version <= stored.version =>
			Transition::Stale { stored: stored.version },
		(None, Change::Delete) => Transition::Absent,
		(Some(stored), Change::Delete) =>
			Transition::Delete { key: key.clone(), expected: stored.version },
		(current, Change::Upsert { state, data }) => Transition::Put {
			entry: PlatformStateEntry {
				key: key.clone(),
				state: *state,
				version,
				updated_at: now,
				data: data.clone(),
			},
			expected: current.map(|stored| stored.version),
		},
	}
}

/// Applies `change` to the entry under `key` unless a newer version is already stored.
///
/// Lost compare-and-swap races re-read the entry and re-decide, up to the policy's attempt limit.
pub async fn apply_guarded(
	store: &dyn PlatformStateStore,
	key: &PlatformStateKey,
	version: u64,
	change: &Change,
	retry: &RetryPolicy,
) -> Result<GuardedOutcome> {
	let mut attempt = 0;

	loop {
		attempt += 1;

		let current = store.get(key).await?;
		let (written, outcome) =
			match transition(current.as_ref(), key, version, change, OffsetDateTime::now_utc()) {
				Transition::Stale { stored } => {
					obs::trace_stale_discard(key, version, stored);

					return Ok(if stored == version {
						GuardedOutcome::Duplicate
					} else {
						GuardedOutcome::Stale
					});
				},
				Transition::Absent => return Ok(GuardedOutcome::Absent),
				Transition::Put { entry, expected } =>
					(store.put(entry, expected).await?, GuardedOutcome::Written),
				Transition::Delete { key, expected } =>
					(store.delete(&key, expected).await?, GuardedOutcome::Deleted),
			};

		if written == WriteOutcome::Written {
			return Ok(outcome);
		}
		if attempt >= retry.max_attempts {
			return Err(
				TransientError::WriteConflict { key: key.render(), attempts: attempt }.into()
			);
		}

		pause(retry, attempt).await;
	}
}
