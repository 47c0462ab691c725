//! Descriptor projection driven by e-service catalog events.

// self
use crate::{
	_prelude::*,
	events::{CatalogEvent, CatalogEventKind, EventEnvelope, EventFamily},
	projection::{
		Change, ProjectionFuture, ProjectionOutcome, ProjectionWriter, TokenGenPatch,
		WriterContext, guarded, observed,
	},
	state::{DescriptorLink, ItemState, Linked, PlatformStateData, PlatformStateKey},
};

/// Maintains `DESC#` entries and the descriptor blocks copied onto consumer keys.
#[derive(Clone, Debug)]
pub struct CatalogWriter {
	ctx: WriterContext,
}
impl CatalogWriter {
	/// Creates a writer over the shared stores.
	pub fn new(ctx: WriterContext) -> Self {
		Self { ctx }
	}

	async fn handle(&self, event: CatalogEvent) -> Result<ProjectionOutcome> {
		use CatalogEventKind as Kind;

		let archived = match event.kind {
			Kind::EServiceDescriptorPublished
			| Kind::EServiceDescriptorActivated
			| Kind::EServiceDescriptorSuspended
			| Kind::EServiceDescriptorQuotasUpdated => false,
			Kind::EServiceDescriptorArchived => true,
			Kind::EServiceAdded
			| Kind::DraftEServiceUpdated
			| Kind::EServiceDeleted
			| Kind::EServiceCloned
			| Kind::EServiceDescriptorAdded
			| Kind::DraftEServiceDescriptorUpdated
			| Kind::EServiceDraftDescriptorDeleted
			| Kind::EServiceDescriptorDocumentAdded
			| Kind::EServiceDescriptorDocumentDeleted
			| Kind::EServiceDescriptorSubmittedByDelegate
			| Kind::EServiceDescriptorRejectedByDelegator => return Ok(ProjectionOutcome::Ignored),
		};
		let eservice = event.require(&event.payload.eservice, "eservice")?;
		let descriptor_id = event.require(&event.payload.descriptor_id, "descriptorId")?;
		let descriptor = eservice.descriptor(descriptor_id).ok_or(Error::MissingEventData {
			event_type: event.kind.as_str(),
			field: "eservice.descriptors",
		})?;
		let key = PlatformStateKey::Descriptor(descriptor_id.clone());
		let (change, state) = if archived {
			(Change::Delete, ItemState::Inactive)
		} else {
			let state = descriptor.state.item_state();
			let data = PlatformStateData::Descriptor {
				eservice_id: eservice.id.clone(),
				audience: descriptor.audience.clone(),
				voucher_lifespan: descriptor.voucher_lifespan,
			};

			(Change::Upsert { state, data }, state)
		};
		let outcome = guarded::apply_guarded(
			self.ctx.stores.platform.as_ref(),
			&key,
			event.version,
			&change,
			&self.ctx.retry,
		)
		.await?;
		let patch = TokenGenPatch::Descriptor {
			eservice_id: eservice.id.clone(),
			descriptor: Linked::new(
				DescriptorLink {
					descriptor_id: descriptor_id.clone(),
					state,
					audience: descriptor.audience.clone(),
					voucher_lifespan: descriptor.voucher_lifespan,
				},
				event.version,
			),
		};

		self.ctx.finish(outcome, &patch).await
	}
}
impl ProjectionWriter for CatalogWriter {
	fn family(&self) -> EventFamily {
		EventFamily::Catalog
	}

	fn apply<'a>(&'a self, envelope: &'a EventEnvelope) -> ProjectionFuture<'a, ProjectionOutcome> {
		observed(EventFamily::Catalog, async move { self.handle(envelope.decode()?).await })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		auth::DescriptorId,
		config::RetryPolicy,
		store::{MemoryStore, PlatformStateStore, StoreClient},
	};

	const ESERVICE: &str = "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e";
	const DESCRIPTOR: &str = "3c4d5e6f-7a8b-4c9d-8e1f-2a3b4c5d6e7f";

	fn envelope(version: u64, event_type: &str, state: &str) -> EventEnvelope {
		EventEnvelope::new(
			ESERVICE,
			version,
			event_type,
			json!({
				"descriptorId": DESCRIPTOR,
				"eservice": {
					"id": ESERVICE,
					"producerId": ESERVICE,
					"descriptors": [{
						"id": DESCRIPTOR,
						"state": state,
						"audience": ["aud.example"],
						"voucherLifespan": 600
					}]
				}
			}),
		)
	}

	#[tokio::test]
	async fn descriptor_lifecycle_is_projected() {
		let store = Arc::new(MemoryStore::default());
		let writer = CatalogWriter::new(WriterContext::new(
			StoreClient::new(store.clone(), store.clone()),
			RetryPolicy::immediate(3),
		));
		let key =
			PlatformStateKey::Descriptor(DescriptorId::new(DESCRIPTOR).expect("Fixture is valid."));

		assert_eq!(
			writer
				.apply(&envelope(1, "EServiceDescriptorAdded", "Draft"))
				.await
				.expect("Draft events should be ignored."),
			ProjectionOutcome::Ignored
		);
		assert!(matches!(
			writer
				.apply(&envelope(2, "EServiceDescriptorPublished", "Published"))
				.await
				.expect("Publication should be projected."),
			ProjectionOutcome::Applied(_)
		));

		let stored = PlatformStateStore::get(store.as_ref(), &key)
			.await
			.expect("Read should succeed.")
			.expect("Descriptor entry should exist.");

		assert_eq!(stored.state, ItemState::Active);
		assert_eq!(stored.version, 2);

		writer
			.apply(&envelope(3, "EServiceDescriptorSuspended", "Suspended"))
			.await
			.expect("Suspension should be projected.");

		assert_eq!(
			writer
				.apply(&envelope(2, "EServiceDescriptorPublished", "Published"))
				.await
				.expect("Replays should be discarded."),
			ProjectionOutcome::Discarded
		);

		let stored = PlatformStateStore::get(store.as_ref(), &key)
			.await
			.expect("Read should succeed.")
			.expect("Descriptor entry should exist.");

		assert_eq!(stored.state, ItemState::Inactive);

		writer
			.apply(&envelope(4, "EServiceDescriptorArchived", "Archived"))
			.await
			.expect("Archival should be projected.");

		assert_eq!(store.platform_len(), 0);
	}

	#[tokio::test]
	async fn missing_snapshot_is_a_data_defect() {
		let store = Arc::new(MemoryStore::default());
		let writer = CatalogWriter::new(WriterContext::new(
			StoreClient::new(store.clone(), store),
			RetryPolicy::immediate(1),
		));
		let envelope = EventEnvelope::new(
			ESERVICE,
			1,
			"EServiceDescriptorPublished",
			json!({ "descriptorId": DESCRIPTOR }),
		);
		let err = writer.apply(&envelope).await.expect_err("Missing snapshot should fail.");

		assert!(matches!(err, Error::MissingEventData { field: "eservice", .. }));
		assert!(!err.is_retryable());
	}
}
