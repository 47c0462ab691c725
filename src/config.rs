//! Issuer configuration and the writer retry policy.
//!
//! [`IssuerConfig`] is assembled through [`IssuerConfigBuilder`], or deserialized from JSON; both
//! paths run the same validation so a loaded file can never bypass it.

// std
use std::time::Duration as StdDuration;
// crates.io
use jsonwebtoken::Algorithm;
use rand::Rng;
// self
use crate::{_prelude::*, auth::KeyId, error::ConfigError};

const DEFAULT_API_TOKEN_LIFESPAN: u32 = 600;
const DEFAULT_CLOCK_LEEWAY: u64 = 60;

/// Errors raised while constructing or validating an [`IssuerConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum IssuerConfigError {
	/// The token issuer is required.
	#[error("Missing token issuer.")]
	MissingIssuer,
	/// At least one client-assertion audience must be accepted.
	#[error("At least one client assertion audience is required.")]
	NoAudiences,
	/// Audience values cannot be blank.
	#[error("Audience values must not be empty.")]
	EmptyAudience,
	/// At least one assertion algorithm must be allowed.
	#[error("At least one client assertion algorithm must be allowed.")]
	NoAllowedAlgorithms,
	/// Symmetric algorithms cannot verify keys registered as public keys.
	#[error("Algorithm {alg} is not an asymmetric signature algorithm.")]
	SymmetricAlgorithm {
		/// Rejected algorithm name.
		alg: String,
	},
	/// API-kind tokens need a fixed audience.
	#[error("Missing audience for API client tokens.")]
	MissingApiAudience,
	/// Token lifetimes must be positive.
	#[error("API client token lifespan must be greater than zero.")]
	InvalidApiTokenLifespan,
	/// The `kid` placed on minted tokens is required.
	#[error("Missing signing key identifier.")]
	MissingSigningKid,
	/// Retry policy values are inconsistent.
	#[error("Invalid retry policy: {reason}.")]
	InvalidRetryPolicy {
		/// What is wrong with the policy.
		reason: &'static str,
	},
}

/// Bounded read-modify-write retry policy applied by the projection writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub max_attempts: u32,
	/// Delay before the first retry, in milliseconds.
	pub base_delay_ms: u64,
	/// Upper bound for any single delay, in milliseconds.
	pub max_delay_ms: u64,
}
impl RetryPolicy {
	/// Policy that retries immediately; intended for tests.
	pub const fn immediate(max_attempts: u32) -> Self {
		Self { max_attempts, base_delay_ms: 0, max_delay_ms: 0 }
	}

	/// Exponential delay with full jitter before retry number `attempt` (1-based).
	pub fn backoff(&self, attempt: u32) -> StdDuration {
		let ceiling = self
			.base_delay_ms
			.saturating_mul(1_u64 << attempt.saturating_sub(1).min(16))
			.min(self.max_delay_ms);

		if ceiling == 0 {
			return StdDuration::ZERO;
		}

		StdDuration::from_millis(rand::rng().random_range(ceiling / 2..=ceiling))
	}

	fn validate(&self) -> Result<(), IssuerConfigError> {
		if self.max_attempts == 0 {
			return Err(IssuerConfigError::InvalidRetryPolicy {
				reason: "max_attempts must be at least 1",
			});
		}
		if self.base_delay_ms > self.max_delay_ms {
			return Err(IssuerConfigError::InvalidRetryPolicy {
				reason: "base_delay_ms exceeds max_delay_ms",
			});
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self { max_attempts: 5, base_delay_ms: 20, max_delay_ms: 500 }
	}
}

/// Validated issuer configuration shared by the validator stages and the token minter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IssuerConfigBuilder", rename_all = "camelCase")]
pub struct IssuerConfig {
	/// `iss` claim of minted tokens.
	pub issuer: String,
	/// Accepted client-assertion audiences.
	pub audiences: Vec<String>,
	/// Accepted client-assertion header algorithms.
	pub allowed_algorithms: Vec<Algorithm>,
	/// Audience of tokens minted for API-kind clients.
	pub api_audience: Vec<String>,
	/// Lifetime of tokens minted for API-kind clients, in seconds.
	pub api_token_lifespan: u32,
	/// `kid` header of minted tokens.
	pub signing_kid: KeyId,
	/// Clock skew tolerated when checking assertion `exp`/`nbf`, in seconds.
	pub clock_leeway: u64,
	/// Compare-and-swap retry policy of the projection writers.
	pub retry: RetryPolicy,
}
impl IssuerConfig {
	/// Starts a new builder.
	pub fn builder() -> IssuerConfigBuilder {
		IssuerConfigBuilder::default()
	}

	/// Parses and validates a JSON document, reporting the path of any malformed field.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let builder: IssuerConfigBuilder = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::IssuerParse { source })?;

		Ok(builder.build()?)
	}

	/// API-kind token lifetime as a [`Duration`].
	pub fn api_token_ttl(&self) -> Duration {
		Duration::seconds(i64::from(self.api_token_lifespan))
	}
}

/// Builder for [`IssuerConfig`] values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IssuerConfigBuilder {
	/// `iss` claim of minted tokens.
	pub issuer: Option<String>,
	/// Accepted client-assertion audiences.
	pub audiences: Vec<String>,
	/// Accepted client-assertion header algorithms.
	pub allowed_algorithms: Vec<Algorithm>,
	/// Audience of tokens minted for API-kind clients.
	pub api_audience: Vec<String>,
	/// Lifetime of API-kind tokens, in seconds.
	pub api_token_lifespan: u32,
	/// `kid` header of minted tokens.
	pub signing_kid: Option<KeyId>,
	/// Clock leeway, in seconds.
	pub clock_leeway: u64,
	/// Writer retry policy.
	pub retry: RetryPolicy,
}
impl IssuerConfigBuilder {
	/// Sets the token issuer.
	pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
		self.issuer = Some(issuer.into());

		self
	}

	/// Accepts an additional client-assertion audience.
	pub fn audience(mut self, audience: impl Into<String>) -> Self {
		self.audiences.push(audience.into());

		self
	}

	/// Replaces the accepted assertion algorithms.
	pub fn allowed_algorithms<I>(mut self, algorithms: I) -> Self
	where
		I: IntoIterator<Item = Algorithm>,
	{
		self.allowed_algorithms = algorithms.into_iter().collect();

		self
	}

	/// Adds an audience to API-kind tokens.
	pub fn api_audience(mut self, audience: impl Into<String>) -> Self {
		self.api_audience.push(audience.into());

		self
	}

	/// Sets the API-kind token lifespan in seconds.
	pub fn api_token_lifespan(mut self, seconds: u32) -> Self {
		self.api_token_lifespan = seconds;

		self
	}

	/// Sets the `kid` of the signing key.
	pub fn signing_kid(mut self, kid: KeyId) -> Self {
		self.signing_kid = Some(kid);

		self
	}

	/// Sets the clock leeway in seconds.
	pub fn clock_leeway(mut self, seconds: u64) -> Self {
		self.clock_leeway = seconds;

		self
	}

	/// Overrides the writer retry policy.
	pub fn retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<IssuerConfig, IssuerConfigError> {
		let issuer = self
			.issuer
			.filter(|issuer| !issuer.trim().is_empty())
			.ok_or(IssuerConfigError::MissingIssuer)?;

		if self.audiences.is_empty() {
			return Err(IssuerConfigError::NoAudiences);
		}
		if self.allowed_algorithms.is_empty() {
			return Err(IssuerConfigError::NoAllowedAlgorithms);
		}
		if let Some(alg) = self
			.allowed_algorithms
			.iter()
			.find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
		{
			return Err(IssuerConfigError::SymmetricAlgorithm { alg: format!("{alg:?}") });
		}
		if self.api_audience.is_empty() {
			return Err(IssuerConfigError::MissingApiAudience);
		}
		if self.audiences.iter().chain(&self.api_audience).any(|aud| aud.trim().is_empty()) {
			return Err(IssuerConfigError::EmptyAudience);
		}
		if self.api_token_lifespan == 0 {
			return Err(IssuerConfigError::InvalidApiTokenLifespan);
		}

		let signing_kid = self.signing_kid.ok_or(IssuerConfigError::MissingSigningKid)?;

		self.retry.validate()?;

		Ok(IssuerConfig {
			issuer,
			audiences: self.audiences,
			allowed_algorithms: self.allowed_algorithms,
			api_audience: self.api_audience,
			api_token_lifespan: self.api_token_lifespan,
			signing_kid,
			clock_leeway: self.clock_leeway,
			retry: self.retry,
		})
	}
}
impl Default for IssuerConfigBuilder {
	fn default() -> Self {
		Self {
			issuer: None,
			audiences: Vec::new(),
			allowed_algorithms: vec![Algorithm::RS256],
			api_audience: Vec::new(),
			api_token_lifespan: DEFAULT_API_TOKEN_LIFESPAN,
			signing_kid: None,
			clock_leeway: DEFAULT_CLOCK_LEEWAY,
			retry: RetryPolicy::default(),
		}
	}
}
impl TryFrom<IssuerConfigBuilder> for IssuerConfig {
	type Error = IssuerConfigError;

	fn try_from(builder: IssuerConfigBuilder) -> Result<Self, Self::Error> {
		builder.build()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder() -> IssuerConfigBuilder {
		IssuerConfig::builder()
			.issuer("interop.example")
			.audience("auth.example/client-assertion")
			.api_audience("api.example")
			.signing_kid(KeyId::new("issuer-kid").expect("Fixture kid should be valid."))
	}

	#[test]
	fn builder_applies_defaults() {
		let config = builder().build().expect("Complete builder should produce a config.");

		assert_eq!(config.allowed_algorithms, vec![Algorithm::RS256]);
		assert_eq!(config.api_token_ttl(), Duration::seconds(600));
		assert_eq!(config.retry, RetryPolicy::default());
	}

	#[test]
	fn builder_rejects_incomplete_configs() {
		assert_eq!(
			IssuerConfig::builder().build().expect_err("Empty builder should fail."),
			IssuerConfigError::MissingIssuer
		);
		assert_eq!(
			builder()
				.allowed_algorithms([Algorithm::HS256])
				.build()
				.expect_err("Symmetric algorithms should be rejected."),
			IssuerConfigError::SymmetricAlgorithm { alg: "HS256".into() }
		);
		assert!(matches!(
			builder().retry(RetryPolicy::immediate(0)).build(),
			Err(IssuerConfigError::InvalidRetryPolicy { .. })
		));
	}

	#[test]
	fn json_loading_runs_validation_and_reports_paths() {
		let config = IssuerConfig::from_json(
			r#"{
				"issuer": "interop.example",
				"audiences": ["aud"],
				"apiAudience": ["api"],
				"signingKid": "kid-1",
				"retry": { "maxAttempts": 2 }
			}"#,
		)
		.expect("Valid JSON config should load.");

		assert_eq!(config.retry.max_attempts, 2);
		assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);

		let err = IssuerConfig::from_json(r#"{"issuer": "x", "audiences": "aud"}"#)
			.expect_err("A bare string audience list should fail to parse.");

		match err {
			ConfigError::IssuerParse { source } =>
				assert_eq!(source.path().to_string(), "audiences"),
			other => panic!("Unexpected error: {other:?}"),
		}

		assert!(matches!(
			IssuerConfig::from_json(r#"{"issuer": "x", "audiences": ["a"], "apiAudience": ["b"]}"#),
			Err(ConfigError::Issuer(IssuerConfigError::MissingSigningKid))
		));
	}

	#[test]
	fn backoff_stays_within_bounds() {
		let policy = RetryPolicy { max_attempts: 4, base_delay_ms: 10, max_delay_ms: 40 };

		for attempt in 1..=6 {
			assert!(policy.backoff(attempt) <= StdDuration::from_millis(40));
		}

		assert_eq!(RetryPolicy::immediate(3).backoff(2), StdDuration::ZERO);
	}
}
