//! Event-driven writers that keep the platform-state and token-generation tables current.
//!
//! Every writer follows the same algorithm: decode the envelope, derive the entity's new
//! authorization state, apply a version-guarded write to the platform-state table
//! ([`guarded`]), then patch every token-generation entry that copied the entity's state
//! ([`fanout`]). Stale or duplicate events never move a stored version backwards, so delivery
//! order only matters within a single stream.

pub mod agreement;
pub mod catalog;
pub mod client;
pub mod consumer;
pub mod fanout;
pub mod guarded;
pub mod purpose;

pub use agreement::AgreementWriter;
pub use catalog::CatalogWriter;
pub use client::ClientWriter;
pub use consumer::*;
pub use fanout::{FanOutReport, TokenGenPatch};
pub use guarded::{Change, GuardedOutcome, Transition};
pub use purpose::PurposeWriter;

// self
use crate::{
	_prelude::*,
	config::RetryPolicy,
	events::{EventEnvelope, EventFamily},
	obs::{self, Pipeline, PipelineSpan},
	store::StoreClient,
};

/// Boxed future returned by [`ProjectionWriter::apply`].
pub type ProjectionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// How a writer handled one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionOutcome {
	/// The event changed stored state; carries the fan-out tally.
	Applied(FanOutReport),
	/// The event was older than, or identical to, the stored state.
	Discarded,
	/// The event type carries nothing relevant to authorization.
	Ignored,
}
impl ProjectionOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Applied(_) => "applied",
			Self::Discarded => "discarded",
			Self::Ignored => "ignored",
		}
	}
}

/// A writer for one upstream entity family.
pub trait ProjectionWriter
where
	Self: Send + Sync,
{
	/// Family of events the writer consumes.
	fn family(&self) -> EventFamily;

	/// Applies one event; safe to call again with the same envelope.
	fn apply<'a>(&'a self, envelope: &'a EventEnvelope) -> ProjectionFuture<'a, ProjectionOutcome>;
}

/// Store handles and retry policy shared by every writer.
#[derive(Clone, Debug)]
pub struct WriterContext {
	/// Both tables.
	pub stores: StoreClient,
	/// Compare-and-swap retry policy.
	pub retry: RetryPolicy,
}
impl WriterContext {
	/// Bundles the store client with a retry policy.
	pub fn new(stores: StoreClient, retry: RetryPolicy) -> Self {
		Self { stores, retry }
	}

	/// Runs the fan-out that follows a guarded platform write.
	///
	/// Duplicates of the stored version still fan out, so a redelivered event completes a
	/// fan-out that was interrupted the first time.
	pub(crate) async fn finish(
		&self,
		outcome: GuardedOutcome,
		patch: &TokenGenPatch,
	) -> Result<ProjectionOutcome> {
		match outcome {
			GuardedOutcome::Stale => Ok(ProjectionOutcome::Discarded),
			GuardedOutcome::Duplicate => {
				self.fan_out(patch).await?;

				Ok(ProjectionOutcome::Discarded)
			},
			GuardedOutcome::Written | GuardedOutcome::Deleted | GuardedOutcome::Absent =>
				Ok(ProjectionOutcome::Applied(self.fan_out(patch).await?)),
		}
	}

	async fn fan_out(&self, patch: &TokenGenPatch) -> Result<FanOutReport> {
		let report = fanout::fan_out(self.stores.token_gen.as_ref(), patch, &self.retry).await?;

		if !report.is_complete() {
			obs::trace_fanout_incomplete(&patch.lookup(), report.matched, report.conflicted);
		}

		Ok(report)
	}
}

/// Instruments a writer future and records its outcome.
pub(crate) fn observed<'a, F>(
	family: EventFamily,
	fut: F,
) -> ProjectionFuture<'a, ProjectionOutcome>
where
	F: 'a + Send + Future<Output = Result<ProjectionOutcome>>,
{
	let span = PipelineSpan::new(Pipeline::Projection, family.as_str());

	Box::pin(span.instrument(async move {
		let result = fut.await;

		match &result {
			Ok(outcome) => obs::record_projection(family.as_str(), outcome.as_str()),
			Err(_) => obs::record_projection(family.as_str(), "failure"),
		}

		result
	}))
}

/// Sleeps for the policy's backoff before retry number `attempt`.
pub(crate) async fn pause(retry: &RetryPolicy, attempt: u32) {
	let delay = retry.backoff(attempt);

	if !delay.is_zero() {
		tokio::time::sleep(delay).await;
	}
}
