//! Agreement events.

// self
use crate::{
	_prelude::*,
	auth::{AgreementId, DescriptorId, EServiceId, TenantId},
	events::{DomainEvent, EventFamily, event_kinds},
	state::ItemState,
};

/// Decoded agreement event.
pub type AgreementEvent = DomainEvent<AgreementEventKind, AgreementPayload>;

event_kinds! {
	/// Every event type emitted on an agreement stream.
	AgreementEventKind, EventFamily::Agreement, {
		/// A draft agreement was created.
		AgreementAdded,
		/// A draft agreement was removed.
		AgreementDeleted,
		/// A draft agreement was edited.
		DraftAgreementUpdated,
		/// The consumer submitted the agreement.
		AgreementSubmitted,
		/// The agreement became active.
		AgreementActivated,
		/// The producer suspended the agreement.
		AgreementSuspendedByProducer,
		/// The consumer suspended the agreement.
		AgreementSuspendedByConsumer,
		/// The platform suspended the agreement.
		AgreementSuspendedByPlatform,
		/// The producer lifted its suspension.
		AgreementUnsuspendedByProducer,
		/// The consumer lifted its suspension.
		AgreementUnsuspendedByConsumer,
		/// The platform lifted its suspension.
		AgreementUnsuspendedByPlatform,
		/// The agreement moved to a newer descriptor.
		AgreementUpgraded,
		/// The consumer archived the agreement.
		AgreementArchivedByConsumer,
		/// The agreement was archived in favour of an upgraded one.
		AgreementArchivedByUpgrade,
		/// The producer rejected the agreement.
		AgreementRejected,
		/// A consumer document was attached.
		AgreementConsumerDocumentAdded,
		/// A consumer document was removed.
		AgreementConsumerDocumentRemoved,
		/// The platform moved the agreement back to draft.
		AgreementSetDraftByPlatform,
		/// The platform flagged missing certified attributes.
		AgreementSetMissingCertifiedAttributesByPlatform,
	}
}

/// Domain state of an agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgreementState {
	/// Being edited by the consumer.
	Draft,
	/// Awaiting producer approval.
	Pending,
	/// Grants access.
	Active,
	/// Suspended by at least one party.
	Suspended,
	/// Permanently retired.
	Archived,
	/// Rejected by the producer.
	Rejected,
	/// Consumer lacks certified attributes.
	MissingCertifiedAttributes,
}
impl AgreementState {
	/// Only active agreements grant access.
	pub const fn item_state(self) -> ItemState {
		ItemState::from_active(matches!(self, Self::Active))
	}
}

/// Agreement snapshot embedded in agreement events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementSnapshot {
	/// Agreement identifier.
	pub id: AgreementId,
	/// E-service the agreement grants access to.
	pub eservice_id: EServiceId,
	/// Descriptor the agreement is bound to.
	pub descriptor_id: DescriptorId,
	/// Consumer tenant.
	pub consumer_id: TenantId,
	/// Producer tenant.
	pub producer_id: TenantId,
	/// State after the event.
	pub state: AgreementState,
}

/// Payload of every agreement event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementPayload {
	/// Agreement state after the event.
	pub agreement: Option<AgreementSnapshot>,
}
