//! Propagation of platform-state changes into the token-generation entries that copy them.
//!
//! Each copied block keeps the platform-state version it came from, so a patch only lands when
//! it is newer than the block it replaces. Entries are patched one by one under their own
//! storage revision; an entry that keeps losing races is reported, not failed, because the next
//! event touching the same entity rewrites it anyway.

// self
use crate::{
	_prelude::*,
	auth::{EServiceId, PurposeId, TenantId},
	config::RetryPolicy,
	obs,
	projection::pause,
	state::{
		AgreementLink, DescriptorLink, Linked, LookupKey, PlatformStateData, PlatformStateEntry,
		PlatformStateKey, PurposeBinding, PurposeLink, TokenGenStateEntry,
	},
	store::{PlatformStateStore, TokenGenStateStore, WriteOutcome},
};

/// Tally of one fan-out (or of one batch of client-entry writes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
	/// Entries reached through the lookup key.
	pub matched: usize,
	/// Entries written.
	pub updated: usize,
	/// Entries already current, newer than the patch, or gone.
	pub unchanged: usize,
	/// Entries skipped after exhausting compare-and-swap attempts.
	pub conflicted: usize,
}
impl FanOutReport {
	/// Returns `true` when every matched entry ended up current.
	pub fn is_complete(&self) -> bool {
		self.conflicted == 0
	}

	pub(crate) fn record(&mut self, patched: Patched) {
		self.matched += 1;

		match patched {
			Patched::Updated => self.updated += 1,
			Patched::Unchanged => self.unchanged += 1,
			Patched::Conflicted => self.conflicted += 1,
		}
	}
}

/// Per-entry result of a fan-out write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Patched {
	Updated,
	Unchanged,
	Conflicted,
}

/// Platform-state change to copy onto matching token-generation entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenGenPatch {
	/// Agreement change, matched by `consumerId#eserviceId`.
	Agreement {
		/// Consumer tenant.
		consumer_id: TenantId,
		/// E-service the agreement grants access to.
		eservice_id: EServiceId,
		/// New agreement state.
		agreement: Linked<AgreementLink>,
		/// Descriptor the agreement is bound to, when known.
		descriptor: Option<Linked<DescriptorLink>>,
	},
	/// Descriptor change, matched by `eserviceId#descriptorId`.
	Descriptor {
		/// Owning e-service.
		eservice_id: EServiceId,
		/// New descriptor state.
		descriptor: Linked<DescriptorLink>,
	},
	/// Purpose change, matched by `purposeId`.
	Purpose {
		/// Purpose identifier.
		purpose_id: PurposeId,
		/// E-service the purpose targets.
		eservice_id: EServiceId,
		/// New purpose state.
		purpose: Linked<PurposeLink>,
		/// Agreement back-filled from platform state.
		agreement: Option<Linked<AgreementLink>>,
		/// Descriptor back-filled from platform state.
		descriptor: Option<Linked<DescriptorLink>>,
	},
}
impl TokenGenPatch {
	/// Secondary key selecting the entries the patch applies to.
	pub fn lookup(&self) -> LookupKey {
		match self {
			Self::Agreement { consumer_id, eservice_id, .. } =>
				LookupKey::ConsumerEService(consumer_id.clone(), eservice_id.clone()),
			Self::Descriptor { eservice_id, descriptor } => LookupKey::EServiceDescriptor(
				eservice_id.clone(),
				descriptor.value.descriptor_id.clone(),
			),
			Self::Purpose { purpose_id, .. } => LookupKey::Purpose(purpose_id.clone()),
		}
	}

	/// Merges the patch into a binding; returns `true` if anything changed.
	pub fn apply(&self, binding: &mut PurposeBinding) -> bool {
		match self {
			Self::Agreement { agreement, descriptor, .. } => {
				let mut changed = merge_agreement(&mut binding.agreement, agreement);

				if let Some(descriptor) = descriptor {
					changed |= merge_descriptor(binding, descriptor);
				}

				changed | drop_unbound_descriptor(binding)
			},
			Self::Descriptor { descriptor, .. } => merge_descriptor(binding, descriptor),
			Self::Purpose { eservice_id, purpose, agreement, descriptor, .. } => {
				let mut changed = false;

				if binding.eservice_id.as_ref() != Some(eservice_id) {
					binding.eservice_id = Some(eservice_id.clone());
					changed = true;
				}

				changed |= merge_linked(&mut binding.purpose, purpose);

				if let Some(agreement) = agreement {
					changed |= merge_agreement(&mut binding.agreement, agreement);
				}
				if let Some(descriptor) = descriptor {
					changed |= merge_descriptor(binding, descriptor);
				}

				changed | drop_unbound_descriptor(binding)
			},
		}
	}
}

/// Patches every entry reachable through the patch's lookup key.
pub async fn fan_out(
	store: &dyn TokenGenStateStore,
	patch: &TokenGenPatch,
	retry: &RetryPolicy,
) -> Result<FanOutReport> {
	let lookup = patch.lookup();
	let mut report = FanOutReport::default();

	for entry in store.query(&lookup).await? {
		report.record(patch_entry(store, entry, patch, &lookup, retry).await?);
	}

	Ok(report)
}

async fn patch_entry(
	store: &dyn TokenGenStateStore,
	mut entry: TokenGenStateEntry,
	patch: &TokenGenPatch,
	lookup: &LookupKey,
	retry: &RetryPolicy,
) -> Result<Patched> {
	let mut attempt = 0;

	loop {
		attempt += 1;

		let Some(binding) = entry.binding.as_mut() else { return Ok(Patched::Unchanged) };

		if !patch.apply(binding) {
			return Ok(Patched::Unchanged);
		}

		let key = entry.key.clone();
		let expected = entry.revision;

		entry.updated_at = OffsetDateTime::now_utc();

		if store.put(entry, Some(expected)).await? == WriteOutcome::Written {
			return Ok(Patched::Updated);
		}
		if attempt >= retry.max_attempts {
			obs::trace_fanout_conflict(&key, attempt);

			return Ok(Patched::Conflicted);
		}

		pause(retry, attempt).await;

		match store.get(&key).await? {
			Some(fresh) if fresh.matches(lookup) => entry = fresh,
			_ => return Ok(Patched::Unchanged),
		}
	}
}

/// Copies a platform-state agreement entry into a link block.
pub fn agreement_link(entry: &PlatformStateEntry) -> Option<Linked<AgreementLink>> {
	match (&entry.key, &entry.data) {
		(PlatformStateKey::Agreement(id), PlatformStateData::Agreement { descriptor_id, .. }) =>
			Some(Linked::new(
				AgreementLink {
					agreement_id: id.clone(),
					descriptor_id: descriptor_id.clone(),
					state: entry.state,
				},
				entry.version,
			)),
		_ => None,
	}
}

/// Copies a platform-state descriptor entry into a link block.
pub fn descriptor_link(entry: &PlatformStateEntry) -> Option<Linked<DescriptorLink>> {
	match (&entry.key, &entry.data) {
		(
			PlatformStateKey::Descriptor(id),
			PlatformStateData::Descriptor { audience, voucher_lifespan, .. },
		) => Some(Linked::new(
			DescriptorLink {
				descriptor_id: id.clone(),
				state: entry.state,
				audience: audience.clone(),
				voucher_lifespan: *voucher_lifespan,
			},
			entry.version,
		)),
		_ => None,
	}
}

/// Looks up the agreement between consumer and e-service, plus its descriptor.
///
/// With several agreements on record (an upgrade in flight), the active one wins.
pub async fn resolve_agreement(
	platform: &dyn PlatformStateStore,
	consumer: &TenantId,
	eservice: &EServiceId,
) -> Result<(Option<Linked<AgreementLink>>, Option<Linked<DescriptorLink>>)> {
	let Some(agreement) = platform
		.find_agreements(consumer, eservice)
		.await?
		.iter()
		.filter_map(agreement_link)
		.max_by_key(|link| (link.value.state.is_active(), link.version))
	else {
		return Ok((None, None));
	};
	let descriptor = resolve_descriptor(platform, &agreement.value).await?;

	Ok((Some(agreement), descriptor))
}

/// Reads the descriptor an agreement is bound to.
pub async fn resolve_descriptor(
	platform: &dyn PlatformStateStore,
	agreement: &AgreementLink,
) -> Result<Option<Linked<DescriptorLink>>> {
	let key = PlatformStateKey::Descriptor(agreement.descriptor_id.clone());

	Ok(platform.get(&key).await?.as_ref().and_then(descriptor_link))
}

/// Builds a binding for a purpose from whatever platform state is already known.
pub async fn resolve_binding(
	platform: &dyn PlatformStateStore,
	purpose_id: &PurposeId,
) -> Result<PurposeBinding> {
	let mut binding = PurposeBinding::new(purpose_id.clone());
	let Some(entry) = platform.get(&PlatformStateKey::Purpose(purpose_id.clone())).await? else {
		return Ok(binding);
	};

	if let PlatformStateData::Purpose { eservice_id, consumer_id, version_id } = &entry.data {
		let (agreement, descriptor) = resolve_agreement(platform, consumer_id, eservice_id).await?;

		binding.eservice_id = Some(eservice_id.clone());
		binding.purpose = Some(Linked::new(
			PurposeLink { version_id: version_id.clone(), state: entry.state },
			entry.version,
		));
		binding.agreement = agreement;
		binding.descriptor = descriptor;
	}

	Ok(binding)
}

fn merge_linked<T>(slot: &mut Option<Linked<T>>, incoming: &Linked<T>) -> bool
where
	T: Clone,
{
	match slot {
		Some(current) if current.version >= incoming.version => false,
		_ => {
			*slot = Some(incoming.clone());

			true
		},
	}
}

// Switching to another agreement (upgrade, re-subscription) is allowed whenever it does not
// replace an active agreement with an inactive one.
fn merge_agreement(
	slot: &mut Option<Linked<AgreementLink>>,
	incoming: &Linked<AgreementLink>,
) -> bool {
	match slot {
		Some(current) if current.value.agreement_id != incoming.value.agreement_id => {
			if incoming.value.state.is_active() || !current.value.state.is_active() {
				*slot = Some(incoming.clone());

				true
			} else {
				false
			}
		},
		_ => merge_linked(slot, incoming),
	}
}

fn merge_descriptor(binding: &mut PurposeBinding, incoming: &Linked<DescriptorLink>) -> bool {
	let bound = binding.agreement.as_ref().map(|agreement| &agreement.value.descriptor_id);

	if bound.is_some_and(|descriptor_id| descriptor_id != &incoming.value.descriptor_id) {
		return false;
	}

	match &binding.descriptor {
		Some(current)
			if current.value.descriptor_id == incoming.value.descriptor_id
				&& current.version >= incoming.version =>
			false,
		_ => {
			binding.descriptor = Some(incoming.clone());

			true
		},
	}
}

fn drop_unbound_descriptor(binding: &mut PurposeBinding) -> bool {
	let unbound = match (&binding.agreement, &binding.descriptor) {
		(Some(agreement), Some(descriptor)) =>
			agreement.value.descriptor_id != descriptor.value.descriptor_id,
		_ => false,
	};

	if unbound {
		binding.descriptor = None;
	}

	unbound
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::Algorithm;
	// self
	use super::*;
	use crate::{
		auth::{AgreementId, ClientId, DescriptorId, KeyId, PurposeVersionId},
		state::{ClientKind, ItemState, TokenGenStateKey},
		store::testing::ConflictingStore,
	};

	const PURPOSE: &str = "0f5a3c7e-1d2b-4e6f-8a9b-3c4d5e6f7a8b";
	const ESERVICE: &str = "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e";
	const TENANT: &str = "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d";
	const DESCRIPTOR_1: &str = "3c4d5e6f-7a8b-4c9d-8e1f-2a3b4c5d6e7f";
	const DESCRIPTOR_2: &str = "3c4d5e6f-7a8b-4c9d-8e1f-2a3b4c5d6e80";
	const AGREEMENT_1: &str = "4d5e6f7a-8b9c-4d0e-9f2a-3b4c5d6e7f8a";
	const AGREEMENT_2: &str = "4d5e6f7a-8b9c-4d0e-9f2a-3b4c5d6e7f8b";
	const VERSION: &str = "5e6f7a8b-9c0d-4e1f-8a3b-4c5d6e7f8a9b";
	const CLIENT: &str = "5c1d2c3e-7f3a-4c8e-9a61-0b9b8f6f2a10";

	fn eservice() -> EServiceId {
		EServiceId::new(ESERVICE).expect("Fixture is valid.")
	}

	fn agreement(
		id: &str,
		descriptor: &str,
		state: ItemState,
		version: u64,
	) -> Linked<AgreementLink> {
		Linked::new(
			AgreementLink {
				agreement_id: AgreementId::new(id).expect("Fixture is valid."),
				descriptor_id: DescriptorId::new(descriptor).expect("Fixture is valid."),
				state,
			},
			version,
		)
	}

	fn descriptor(id: &str, state: ItemState, version: u64) -> Linked<DescriptorLink> {
		Linked::new(
			DescriptorLink {
				descriptor_id: DescriptorId::new(id).expect("Fixture is valid."),
				state,
				audience: vec!["aud.example".into()],
				voucher_lifespan: 600,
			},
			version,
		)
	}

	fn agreement_patch(link: Linked<AgreementLink>) -> TokenGenPatch {
		TokenGenPatch::Agreement {
			consumer_id: TenantId::new(TENANT).expect("Fixture is valid."),
			eservice_id: eservice(),
			agreement: link,
			descriptor: None,
		}
	}

	fn binding() -> PurposeBinding {
		PurposeBinding::new(PurposeId::new(PURPOSE).expect("Fixture is valid."))
	}

	fn bound_entry(kid: &str) -> TokenGenStateEntry {
		let mut binding = binding();

		binding.eservice_id = Some(eservice());
		binding.agreement = Some(agreement(AGREEMENT_1, DESCRIPTOR_1, ItemState::Active, 1));
		binding.descriptor = Some(descriptor(DESCRIPTOR_1, ItemState::Active, 1));

		TokenGenStateEntry {
			key: TokenGenStateKey::client_kid_purpose(
				ClientId::new(CLIENT).expect("Fixture is valid."),
				KeyId::new(kid).expect("Fixture is valid."),
				binding.purpose_id.clone(),
			),
			revision: 0,
			client_version: 1,
			consumer_id: TenantId::new(TENANT).expect("Fixture is valid."),
			client_kind: ClientKind::Consumer,
			public_key: "cGVt".into(),
			algorithm: Algorithm::RS256,
			binding: Some(binding),
			updated_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	#[test]
	fn patches_apply_only_when_newer() {
		let mut binding = binding();
		let active = agreement(AGREEMENT_1, DESCRIPTOR_1, ItemState::Active, 4);
		let suspended = agreement(AGREEMENT_1, DESCRIPTOR_1, ItemState::Inactive, 3);

		assert!(agreement_patch(active.clone()).apply(&mut binding));
		assert!(!agreement_patch(suspended).apply(&mut binding));
		assert!(!agreement_patch(active.clone()).apply(&mut binding));
		assert_eq!(binding.agreement, Some(active));

		let patch = TokenGenPatch::Purpose {
			purpose_id: binding.purpose_id.clone(),
			eservice_id: eservice(),
			purpose: Linked::new(
				PurposeLink {
					version_id: PurposeVersionId::new(VERSION).expect("Fixture is valid."),
					state: ItemState::Active,
				},
				2,
			),
			agreement: None,
			descriptor: None,
		};

		assert!(patch.apply(&mut binding));
		assert!(!patch.apply(&mut binding));
		assert_eq!(binding.eservice_id, Some(eservice()));
	}

	#[test]
	fn descriptor_patches_follow_the_bound_agreement() {
		let mut binding = binding();

		binding.agreement = Some(agreement(AGREEMENT_1, DESCRIPTOR_1, ItemState::Active, 1));

		let other = TokenGenPatch::Descriptor {
			eservice_id: eservice(),
			descriptor: descriptor(DESCRIPTOR_2, ItemState::Active, 9),
		};
		let bound = TokenGenPatch::Descriptor {
			eservice_id: eservice(),
			descriptor: descriptor(DESCRIPTOR_1, ItemState::Inactive, 5),
		};

		assert!(!other.apply(&mut binding));
		assert!(bound.apply(&mut binding));
		assert_eq!(
			binding.descriptor.as_ref().map(|d| d.value.state),
			Some(ItemState::Inactive)
		);

		// Upgrading to a new agreement drops the descriptor of the old one.
		assert!(
			agreement_patch(agreement(AGREEMENT_2, DESCRIPTOR_2, ItemState::Active, 1))
				.apply(&mut binding)
		);
		assert!(binding.descriptor.is_none());
		assert!(other.apply(&mut binding));
	}

	#[test]
	fn archived_agreement_does_not_replace_an_active_one() {
		let mut binding = binding();
		let upgraded = agreement(AGREEMENT_2, DESCRIPTOR_2, ItemState::Active, 1);

		binding.agreement = Some(upgraded.clone());

		assert!(
			!agreement_patch(agreement(AGREEMENT_1, DESCRIPTOR_1, ItemState::Inactive, 7))
				.apply(&mut binding)
		);
		assert_eq!(binding.agreement, Some(upgraded));
	}

	#[tokio::test]
	async fn entries_that_keep_losing_races_are_reported_as_conflicted() {
		let store = ConflictingStore::default();
		let retry = RetryPolicy::immediate(3);

		for kid in ["kid-1", "kid-2"] {
			TokenGenStateStore::put(&store, bound_entry(kid), None)
				.await
				.expect("Seeding should succeed.");
		}

		let patch = TokenGenPatch::Descriptor {
			eservice_id: eservice(),
			descriptor: descriptor(DESCRIPTOR_1, ItemState::Inactive, 2),
		};

		store.conflict_next(3);

		let report = fan_out(&store, &patch, &retry).await.expect("Fan-out should not fail.");

		assert_eq!(report, FanOutReport { matched: 2, updated: 1, unchanged: 0, conflicted: 1 });
		assert!(!report.is_complete());
		assert_eq!(store.puts(), 2 + 3 + 1);

		// Redelivery reaches the entry that was left behind.
		let report = fan_out(&store, &patch, &retry).await.expect("Fan-out should not fail.");

		assert_eq!(report, FanOutReport { matched: 2, updated: 1, unchanged: 1, conflicted: 0 });
		assert!(report.is_complete());

		for entry in TokenGenStateStore::query(&store, &patch.lookup())
			.await
			.expect("Query should succeed.")
		{
			let state = entry.binding.and_then(|binding| binding.descriptor).map(|d| d.value.state);

			assert_eq!(state, Some(ItemState::Inactive));
		}
	}

	#[tokio::test]
	async fn lost_races_are_retried_against_the_fresh_entry() {
		let store = ConflictingStore::default();

		TokenGenStateStore::put(&store, bound_entry("kid-1"), None)
			.await
			.expect("Seeding should succeed.");

		let patch = TokenGenPatch::Descriptor {
			eservice_id: eservice(),
			descriptor: descriptor(DESCRIPTOR_1, ItemState::Inactive, 2),
		};

		store.conflict_next(2);

		let report = fan_out(&store, &patch, &RetryPolicy::immediate(3))
			.await
			.expect("Fan-out should not fail.");

		assert_eq!(report.updated, 1);

		let stored = TokenGenStateStore::get(&store, &bound_entry("kid-1").key)
			.await
			.expect("Read should succeed.")
			.expect("Entry should exist.");

		assert_eq!(stored.revision, 2);
	}
}
