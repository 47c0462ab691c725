//! E-service catalog events.

// self
use crate::{
	_prelude::*,
	auth::{DescriptorId, EServiceId, TenantId},
	events::{DomainEvent, EventFamily, event_kinds},
	state::ItemState,
};

/// Decoded catalog event.
pub type CatalogEvent = DomainEvent<CatalogEventKind, CatalogPayload>;

event_kinds! {
	/// Every event type emitted on an e-service stream.
	CatalogEventKind, EventFamily::Catalog, {
		/// A draft e-service was created.
		EServiceAdded,
		/// A draft e-service was edited.
		DraftEServiceUpdated,
		/// An e-service without published descriptors was removed.
		EServiceDeleted,
		/// A cloned e-service was created.
		EServiceCloned,
		/// A draft descriptor was added.
		EServiceDescriptorAdded,
		/// A draft descriptor was edited.
		DraftEServiceDescriptorUpdated,
		/// A draft descriptor was removed.
		EServiceDraftDescriptorDeleted,
		/// A descriptor was published.
		EServiceDescriptorPublished,
		/// A suspended descriptor was reactivated.
		EServiceDescriptorActivated,
		/// A descriptor was suspended.
		EServiceDescriptorSuspended,
		/// A descriptor was archived.
		EServiceDescriptorArchived,
		/// Voucher lifespan or call quotas of a descriptor changed.
		EServiceDescriptorQuotasUpdated,
		/// A document was attached to a descriptor.
		EServiceDescriptorDocumentAdded,
		/// A descriptor document was removed.
		EServiceDescriptorDocumentDeleted,
		/// A descriptor was submitted for delegated approval.
		EServiceDescriptorSubmittedByDelegate,
		/// A delegated descriptor was rejected.
		EServiceDescriptorRejectedByDelegator,
	}
}

/// Lifecycle state of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptorState {
	/// Not yet published.
	Draft,
	/// Awaiting approval by the delegator.
	WaitingForApproval,
	/// Published and accepting new agreements.
	Published,
	/// Superseded by a newer version; existing agreements still work.
	Deprecated,
	/// Temporarily suspended by the producer.
	Suspended,
	/// Permanently retired.
	Archived,
}
impl DescriptorState {
	/// Published and deprecated descriptors grant access; every other state does not.
	pub const fn item_state(self) -> ItemState {
		ItemState::from_active(matches!(self, Self::Published | Self::Deprecated))
	}
}

/// Descriptor embedded in an e-service snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSnapshot {
	/// Descriptor identifier.
	pub id: DescriptorId,
	/// Lifecycle state.
	pub state: DescriptorState,
	/// Audiences for consumer tokens.
	#[serde(default)]
	pub audience: Vec<String>,
	/// Consumer token lifetime, in seconds.
	pub voucher_lifespan: u32,
}

/// E-service snapshot embedded in catalog events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EServiceSnapshot {
	/// E-service identifier.
	pub id: EServiceId,
	/// Producing tenant.
	pub producer_id: TenantId,
	/// Every descriptor of the e-service.
	#[serde(default)]
	pub descriptors: Vec<DescriptorSnapshot>,
}
impl EServiceSnapshot {
	/// Finds a descriptor by id.
	pub fn descriptor(&self, id: &DescriptorId) -> Option<&DescriptorSnapshot> {
		self.descriptors.iter().find(|descriptor| &descriptor.id == id)
	}
}

/// Payload of every catalog event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPayload {
	/// Descriptor the event is about, for descriptor-level events.
	pub descriptor_id: Option<DescriptorId>,
	/// E-service state after the event.
	pub eservice: Option<EServiceSnapshot>,
}
