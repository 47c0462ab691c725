//! Optional observability helpers for the issuer and the projection writers.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `platform_token_engine.issuance` and
//!   `platform_token_engine.projection` (with a `stage` field), plus structured events for stale
//!   discards, audit degradation, fan-out conflicts, and fatal event failures.
//! - Enable `metrics` to increment `platform_token_engine_issuance_total{outcome}`,
//!   `platform_token_engine_projection_total{family,outcome}`, and
//!   `platform_token_engine_audit_degraded_total`.
//!
//! Without the features every helper compiles to a no-op.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Engine pipelines observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pipeline {
	/// Token issuance requests.
	Issuance,
	/// Event projection into the state tables.
	Projection,
}
impl Pipeline {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Pipeline::Issuance => "issuance",
			Pipeline::Projection => "projection",
		}
	}
}
impl Display for Pipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for token requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssuanceOutcome {
	/// A request entered the pipeline.
	Attempt,
	/// A token was minted.
	Success,
	/// The request was rejected or failed.
	Failure,
}
impl IssuanceOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			IssuanceOutcome::Attempt => "attempt",
			IssuanceOutcome::Success => "success",
			IssuanceOutcome::Failure => "failure",
		}
	}
}
impl Display for IssuanceOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
