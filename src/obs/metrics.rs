// self
use crate::obs::IssuanceOutcome;

/// Records a token request outcome via the global metrics recorder (when enabled).
pub fn record_issuance(outcome: IssuanceOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("platform_token_engine_issuance_total", "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = outcome;
	}
}

/// Records how a projection writer handled an event.
pub fn record_projection(family: &'static str, outcome: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"platform_token_engine_projection_total",
			"family" => family,
			"outcome" => outcome
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (family, outcome);
	}
}

/// Records an issuance whose audit record missed the primary sink.
pub fn record_audit_degraded() {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("platform_token_engine_audit_degraded_total").increment(1);
	}
}
