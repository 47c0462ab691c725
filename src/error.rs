//! Engine-level error types shared across validators, writers, stores, and the issuer.

// self
use crate::_prelude::*;

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Inbound event could not be decoded.
	#[error(transparent)]
	Event(#[from] crate::events::EventError),
	/// Token request or client assertion failed structural validation.
	#[error(transparent)]
	InvalidRequest(#[from] crate::auth::AssertionErrors),
	/// Client assertion signature could not be verified.
	#[error(transparent)]
	Signature(#[from] crate::auth::SignatureError),
	/// Access token could not be signed.
	#[error(transparent)]
	Signing(#[from] crate::auth::SigningError),

	/// No token-generation entry matches the client and key.
	#[error("No token-generation state entry for client {client_id} and key {kid}.")]
	TokenGenStateNotFound {
		/// Client identifier taken from the assertion.
		client_id: String,
		/// Key identifier taken from the assertion header.
		kid: String,
	},
	/// The agreement, descriptor, or purpose bound to the key is not active.
	#[error("Platform state is not valid for token issuance.")]
	PlatformStateInvalid,
	/// An upstream event lacks the embedded snapshot its handler requires.
	#[error("Event {event_type} is missing required data: {field}.")]
	MissingEventData {
		/// Event type discriminator.
		event_type: &'static str,
		/// Name of the absent snapshot.
		field: &'static str,
	},
}
impl Error {
	/// Classifies the error according to who caused it and whether a retry can help.
	pub fn category(&self) -> ErrorCategory {
		match self {
			Self::InvalidRequest(_) => ErrorCategory::RequestValidation,
			Self::Signature(_) => ErrorCategory::Signature,
			Self::TokenGenStateNotFound { .. } | Self::PlatformStateInvalid =>
				ErrorCategory::Entitlement,
			Self::Event(_) | Self::MissingEventData { .. } => ErrorCategory::DataDefect,
			Self::Storage(_) | Self::Transient(_) => ErrorCategory::Transient,
			Self::Config(_) | Self::Signing(_) => ErrorCategory::Config,
		}
	}

	/// HTTP status code surfaced to token requesters.
	pub fn status(&self) -> u16 {
		match self {
			Self::TokenGenStateNotFound { .. } => 401,
			Self::PlatformStateInvalid => 403,
			_ => self.category().status(),
		}
	}

	/// Stable machine-readable code used by problem responses.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Storage(_) => "STORE_UNAVAILABLE",
			Self::Config(_) => "CONFIGURATION_ERROR",
			Self::Transient(_) => "TEMPORARILY_UNAVAILABLE",
			Self::Event(_) => "INVALID_EVENT",
			Self::InvalidRequest(_) => "CLIENT_ASSERTION_VALIDATION_FAILED",
			Self::Signature(_) => "CLIENT_ASSERTION_SIGNATURE_VALIDATION_FAILED",
			Self::Signing(_) => "TOKEN_SIGNING_FAILED",
			Self::TokenGenStateNotFound { .. } => "TOKEN_GENERATION_STATES_ENTRY_NOT_FOUND",
			Self::PlatformStateInvalid => "PLATFORM_STATE_VALIDATION_FAILED",
			Self::MissingEventData { .. } => "MISSING_EVENT_DATA",
		}
	}

	/// Returns `true` when redelivering the same input may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self.category(), ErrorCategory::Transient)
	}
}

/// Error taxonomy used to derive HTTP statuses and retry behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
	/// Malformed request or assertion; never retried.
	RequestValidation,
	/// Expired, premature, malformed, or mismatched signature.
	Signature,
	/// Missing key entry or inactive linked platform state.
	Entitlement,
	/// Upstream producer defect that redelivery cannot fix.
	DataDefect,
	/// Store unavailability or write contention.
	Transient,
	/// Local misconfiguration.
	Config,
}
impl ErrorCategory {
	/// Default HTTP status for the category.
	pub const fn status(self) -> u16 {
		match self {
			Self::RequestValidation => 400,
			Self::Signature => 401,
			Self::Entitlement => 403,
			Self::DataDefect | Self::Transient | Self::Config => 500,
		}
	}

	/// Short human-readable title for problem responses.
	pub const fn title(self) -> &'static str {
		match self {
			Self::RequestValidation => "Invalid token request",
			Self::Signature => "Client assertion signature rejected",
			Self::Entitlement => "Client not entitled to a token",
			Self::DataDefect => "Invalid upstream data",
			Self::Transient => "Service temporarily unavailable",
			Self::Config => "Service misconfigured",
		}
	}
}

/// Configuration and key-material failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Issuer configuration failed validation.
	#[error(transparent)]
	Issuer(#[from] crate::config::IssuerConfigError),
	/// Issuer configuration file could not be parsed.
	#[error("Issuer configuration could not be parsed.")]
	IssuerParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Signing key could not be loaded.
	#[error("Signing key is invalid.")]
	InvalidSigningKey {
		/// Underlying key parsing failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Compare-and-swap kept losing against concurrent writers.
	#[error("Write to {key} lost {attempts} compare-and-swap attempts.")]
	WriteConflict {
		/// Rendered store key.
		key: String,
		/// Number of attempts made before giving up.
		attempts: u32,
	},
	/// The event source stopped accepting events.
	#[error("Event source is closed.")]
	SourceClosed,
}
