//! Agreement projection.

// self
use crate::{
	_prelude::*,
	events::{AgreementEvent, AgreementEventKind, EventEnvelope, EventFamily},
	projection::{
		Change, ProjectionFuture, ProjectionOutcome, ProjectionWriter, TokenGenPatch,
		WriterContext, fanout, guarded, observed,
	},
	state::{AgreementLink, ItemState, Linked, PlatformStateData, PlatformStateKey},
};

/// Maintains `AGREEMENT#` entries and the agreement blocks copied onto consumer keys.
#[derive(Clone, Debug)]
pub struct AgreementWriter {
	ctx: WriterContext,
}
impl AgreementWriter {
	/// Creates a writer over the shared stores.
	pub fn new(ctx: WriterContext) -> Self {
		Self { ctx }
	}

	async fn handle(&self, event: AgreementEvent) -> Result<ProjectionOutcome> {
		use AgreementEventKind as Kind;

		let archived = match event.kind {
			Kind::AgreementActivated
			| Kind::AgreementSuspendedByProducer
			| Kind::AgreementSuspendedByConsumer
			| Kind::AgreementSuspendedByPlatform
			| Kind::AgreementUnsuspendedByProducer
			| Kind::AgreementUnsuspendedByConsumer
			| Kind::AgreementUnsuspendedByPlatform
			| Kind::AgreementUpgraded => false,
			Kind::AgreementArchivedByConsumer | Kind::AgreementArchivedByUpgrade => true,
			Kind::AgreementAdded
			| Kind::AgreementDeleted
			| Kind::DraftAgreementUpdated
			| Kind::AgreementSubmitted
			| Kind::AgreementRejected
			| Kind::AgreementConsumerDocumentAdded
			| Kind::AgreementConsumerDocumentRemoved
			| Kind::AgreementSetDraftByPlatform
			| Kind::AgreementSetMissingCertifiedAttributesByPlatform =>
				return Ok(ProjectionOutcome::Ignored),
		};
		let agreement = event.require(&event.payload.agreement, "agreement")?;
		let key = PlatformStateKey::Agreement(agreement.id.clone());
		let (change, state) = if archived {
			(Change::Delete, ItemState::Inactive)
		} else {
			let state = agreement.state.item_state();
			let data = PlatformStateData::Agreement {
				consumer_id: agreement.consumer_id.clone(),
				eservice_id: agreement.eservice_id.clone(),
				descriptor_id: agreement.descriptor_id.clone(),
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
		let link = AgreementLink {
			agreement_id: agreement.id.clone(),
			descriptor_id: agreement.descriptor_id.clone(),
			state,
		};
		let descriptor = if archived {
			None
		} else {
			fanout::resolve_descriptor(self.ctx.stores.platform.as_ref(), &link).await?
		};
		let patch = TokenGenPatch::Agreement {
			consumer_id: agreement.consumer_id.clone(),
			eservice_id: agreement.eservice_id.clone(),
			agreement: Linked::new(link, event.version),
			descriptor,
		};

		self.ctx.finish(outcome, &patch).await
	}
}
impl ProjectionWriter for AgreementWriter {
	fn family(&self) -> EventFamily {
		EventFamily::Agreement
	}

	fn apply<'a>(&'a self, envelope: &'a EventEnvelope) -> ProjectionFuture<'a, ProjectionOutcome> {
		observed(EventFamily::Agreement, async move { self.handle(envelope.decode()?).await })
	}
}
