//! Purpose projection.

// self
use crate::{
	_prelude::*,
	events::{EventEnvelope, EventFamily, PurposeEvent, PurposeEventKind},
	projection::{
		Change, ProjectionFuture, ProjectionOutcome, ProjectionWriter, TokenGenPatch,
		WriterContext, fanout, guarded, observed,
	},
	state::{ItemState, Linked, PlatformStateData, PlatformStateKey, PurposeLink},
};

/// Maintains `PURPOSE#` entries and the purpose blocks copied onto consumer keys.
///
/// Purpose changes also back-fill the agreement and descriptor blocks, since a key bound to a
/// purpose before any agreement existed has nothing else to learn them from.
#[derive(Clone, Debug)]
pub struct PurposeWriter {
	ctx: WriterContext,
}
impl PurposeWriter {
	/// Creates a writer over the shared stores.
	pub fn new(ctx: WriterContext) -> Self {
		Self { ctx }
	}

	async fn handle(&self, event: PurposeEvent) -> Result<ProjectionOutcome> {
		use PurposeEventKind as Kind;

		let archived = match event.kind {
			Kind::PurposeActivated
			| Kind::NewPurposeVersionActivated
			| Kind::PurposeVersionActivated
			| Kind::PurposeVersionSuspendedByConsumer
			| Kind::PurposeVersionSuspendedByProducer
			| Kind::PurposeVersionUnsuspendedByConsumer
			| Kind::PurposeVersionUnsuspendedByProducer
			| Kind::PurposeVersionOverQuotaUnsuspended => false,
			Kind::PurposeArchived => true,
			Kind::PurposeAdded
			| Kind::DraftPurposeUpdated
			| Kind::DraftPurposeDeleted
			| Kind::PurposeWaitingForApproval
			| Kind::NewPurposeVersionWaitingForApproval
			| Kind::PurposeVersionRejected
			| Kind::WaitingForApprovalPurposeDeleted
			| Kind::WaitingForApprovalPurposeVersionDeleted
			| Kind::PurposeCloned => return Ok(ProjectionOutcome::Ignored),
		};
		let purpose = event.require(&event.payload.purpose, "purpose")?;
		let current = if archived {
			purpose.versions.iter().max_by_key(|version| version.created_at)
		} else {
			purpose.current_version()
		};
		let version = event.require(&current, "purpose.versions")?;
		let key = PlatformStateKey::Purpose(purpose.id.clone());
		let (change, state) = if archived {
			(Change::Delete, ItemState::Inactive)
		} else {
			let state = purpose.item_state();
			let data = PlatformStateData::Purpose {
				eservice_id: purpose.eservice_id.clone(),
				consumer_id: purpose.consumer_id.clone(),
				version_id: version.id.clone(),
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
		let (agreement, descriptor) = if archived {
			(None, None)
		} else {
			fanout::resolve_agreement(
				self.ctx.stores.platform.as_ref(),
				&purpose.consumer_id,
				&purpose.eservice_id,
			)
			.await?
		};
		let patch = TokenGenPatch::Purpose {
			purpose_id: purpose.id.clone(),
			eservice_id: purpose.eservice_id.clone(),
			purpose: Linked::new(
				PurposeLink { version_id: version.id.clone(), state },
				event.version,
			),
			agreement,
			descriptor,
		};

		self.ctx.finish(outcome, &patch).await
	}
}
impl ProjectionWriter for PurposeWriter {
	fn family(&self) -> EventFamily {
		EventFamily::Purpose
	}

	fn apply<'a>(&'a self, envelope: &'a EventEnvelope) -> ProjectionFuture<'a, ProjectionOutcome> {
		observed(EventFamily::Purpose, async move { self.handle(envelope.decode()?).await })
	}
}
