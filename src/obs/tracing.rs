// self
use crate::{_prelude::*, obs::Pipeline};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type Instrumented<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type Instrumented<F> = F;

/// A span covering one token request or one projected event.
#[derive(Clone, Debug)]
pub struct PipelineSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl PipelineSpan {
	/// Creates a new span for the pipeline, tagged with the call-site stage.
	pub fn new(pipeline: Pipeline, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = match pipeline {
				Pipeline::Issuance => tracing::info_span!("platform_token_engine.issuance", stage),
				Pipeline::Projection =>
					tracing::info_span!("platform_token_engine.projection", stage),
			};

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (pipeline, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Records a stale or duplicate event that was discarded by the version guard.
pub fn trace_stale_discard(key: &dyn Display, incoming: u64, stored: u64) {
	#[cfg(feature = "tracing")]
	tracing::debug!(%key, incoming, stored, "discarded stale event");
	#[cfg(not(feature = "tracing"))]
	let _ = (key, incoming, stored);
}

/// Records a fan-out write that could not be applied after every retry.
pub fn trace_fanout_conflict(key: &dyn Display, attempts: u32) {
	#[cfg(feature = "tracing")]
	tracing::warn!(%key, attempts, "fan-out write kept conflicting");
	#[cfg(not(feature = "tracing"))]
	let _ = (key, attempts);
}

/// Records a fan-out that left some matched entries behind.
pub fn trace_fanout_incomplete(lookup: &dyn Display, matched: usize, conflicted: usize) {
	#[cfg(feature = "tracing")]
	tracing::warn!(%lookup, matched, conflicted, "fan-out left entries stale");
	#[cfg(not(feature = "tracing"))]
	let _ = (lookup, matched, conflicted);
}

/// Records an audit record that missed its primary sink.
pub fn trace_audit_degraded(status: &'static str, reason: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::warn!(status, %reason, "audit delivery degraded");
	#[cfg(not(feature = "tracing"))]
	let _ = (status, reason);
}

/// Records why a token request failed the platform-state check; the caller only sees a coarse
/// error.
pub fn trace_entitlement_denied(key: &dyn Display, reasons: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::info!(%key, %reasons, "platform state denied token issuance");
	#[cfg(not(feature = "tracing"))]
	let _ = (key, reasons);
}

/// Records an event whose processing failed; the consumer stops without committing it.
pub fn trace_event_failure(stream_id: &str, version: u64, error: &dyn Display) {
	#[cfg(feature = "tracing")]
	tracing::error!(stream_id, version, %error, "event processing failed");
	#[cfg(not(feature = "tracing"))]
	let _ = (stream_id, version, error);
}
