//! Purpose events.

// self
use crate::{
	_prelude::*,
	auth::{EServiceId, PurposeId, PurposeVersionId, TenantId},
	events::{DomainEvent, EventFamily, event_kinds},
	state::ItemState,
};

/// Decoded purpose event.
pub type PurposeEvent = DomainEvent<PurposeEventKind, PurposePayload>;

event_kinds! {
	/// Every event type emitted on a purpose stream.
	PurposeEventKind, EventFamily::Purpose, {
		/// A draft purpose was created.
		PurposeAdded,
		/// A draft purpose was edited.
		DraftPurposeUpdated,
		/// A draft purpose was removed.
		DraftPurposeDeleted,
		/// The first version awaits producer approval.
		PurposeWaitingForApproval,
		/// The first version was activated.
		PurposeActivated,
		/// A new version was activated, superseding the previous one.
		NewPurposeVersionActivated,
		/// A new version awaits producer approval.
		NewPurposeVersionWaitingForApproval,
		/// A waiting version was approved.
		PurposeVersionActivated,
		/// The consumer suspended the active version.
		PurposeVersionSuspendedByConsumer,
		/// The producer suspended the active version.
		PurposeVersionSuspendedByProducer,
		/// The consumer lifted its suspension.
		PurposeVersionUnsuspendedByConsumer,
		/// The producer lifted its suspension.
		PurposeVersionUnsuspendedByProducer,
		/// A version suspended for exceeding quotas was reactivated.
		PurposeVersionOverQuotaUnsuspended,
		/// A waiting version was rejected.
		PurposeVersionRejected,
		/// The purpose was archived.
		PurposeArchived,
		/// A purpose still awaiting approval was removed.
		WaitingForApprovalPurposeDeleted,
		/// A waiting version was removed.
		WaitingForApprovalPurposeVersionDeleted,
		/// A purpose was cloned into a new draft.
		PurposeCloned,
	}
}

/// State of a single purpose version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurposeVersionState {
	/// Being edited.
	Draft,
	/// Awaiting producer approval.
	WaitingForApproval,
	/// In use.
	Active,
	/// Suspended by either party.
	Suspended,
	/// Superseded or retired.
	Archived,
	/// Refused by the producer.
	Rejected,
}

/// Version of a purpose embedded in a purpose snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeVersionSnapshot {
	/// Version identifier.
	pub id: PurposeVersionId,
	/// Version state.
	pub state: PurposeVersionState,
	/// Creation instant, used to pick the current version.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

/// Purpose snapshot embedded in purpose events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeSnapshot {
	/// Purpose identifier.
	pub id: PurposeId,
	/// E-service the purpose targets.
	pub eservice_id: EServiceId,
	/// Consumer tenant.
	pub consumer_id: TenantId,
	/// Every version of the purpose.
	#[serde(default)]
	pub versions: Vec<PurposeVersionSnapshot>,
}
impl PurposeSnapshot {
	/// Most recently created version that is active or suspended.
	pub fn current_version(&self) -> Option<&PurposeVersionSnapshot> {
		self.versions
			.iter()
			.filter(|version| {
				matches!(
					version.state,
					PurposeVersionState::Active | PurposeVersionState::Suspended
				)
			})
			.max_by_key(|version| version.created_at)
	}

	/// The purpose grants access iff its current version is active.
	pub fn item_state(&self) -> ItemState {
		ItemState::from_active(
			self.current_version()
				.is_some_and(|version| version.state == PurposeVersionState::Active),
		)
	}
}

/// Payload of every purpose event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposePayload {
	/// Purpose state after the event.
	pub purpose: Option<PurposeSnapshot>,
}
