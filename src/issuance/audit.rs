//! Issuance audit records and the sinks that receive them.
//!
//! Delivery is best effort. A sink failure never fails the token response; the issuer reports it
//! as [`AuditStatus::Fallback`] or [`AuditStatus::Failed`] instead.

// std
use std::{
	fmt::Write as _,
	fs::OpenOptions,
	io::Write as _,
	path::{Path, PathBuf},
};
// crates.io
use async_lock::Mutex as AsyncMutex;
#[cfg(feature = "reqwest")]
use reqwest::{
	header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use sha2::{Digest, Sha256};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{
		AgreementId, ClientId, DescriptorId, EServiceId, KeyId, MintedToken, PurposeId,
		PurposeVersionId, TenantId, ValidatedAssertion,
	},
	obs,
	state::TokenGenStateEntry,
};

/// `kind` of records emitted for minted tokens.
pub const TOKEN_GENERATED: &str = "TokenGenerated";

/// Boxed future returned by [`AuditSink::emit`].
pub type AuditFuture<'a> =
	Pin<Box<dyn Future<Output = Result<AuditStatus, AuditError>> + 'a + Send>>;

/// How the audit record of an issued token was delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
	/// The primary sink accepted the record.
	Delivered,
	/// The primary sink failed; the fallback sink accepted the record.
	Fallback,
	/// No sink accepted the record.
	Failed,
}
impl AuditStatus {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Delivered => "delivered",
			Self::Fallback => "fallback",
			Self::Failed => "failed",
		}
	}

	/// Returns `true` unless the primary sink took the record.
	pub const fn is_degraded(self) -> bool {
		!matches!(self, Self::Delivered)
	}
}

/// Audit delivery failures.
#[derive(Debug, ThisError)]
pub enum AuditError {
	/// The record could not be serialized.
	#[error("Audit record could not be serialized.")]
	Serialize {
		/// Serializer failure.
		#[source]
		source: serde_json::Error,
	},
	/// The HTTP request to the audit endpoint failed.
	#[cfg(feature = "reqwest")]
	#[error("Audit endpoint request failed.")]
	Transport {
		/// Transport failure.
		#[source]
		source: ReqwestError,
	},
	/// The audit endpoint answered with a non-success status.
	#[error("Audit endpoint rejected the record with status {status}.")]
	Rejected {
		/// HTTP status code.
		status: u16,
		/// Retry hint sent by the endpoint.
		retry_after: Option<Duration>,
	},
	/// The audit file could not be appended to.
	#[error("Audit file could not be written.")]
	Io {
		/// I/O failure.
		#[source]
		source: std::io::Error,
	},
	/// The sink is not accepting records.
	#[error("Audit sink unavailable: {reason}.")]
	Unavailable {
		/// Human-readable reason.
		reason: String,
	},
	/// Both the primary and the fallback sink failed.
	#[error("Primary audit sink failed ({primary}) and so did the fallback ({fallback}).")]
	Exhausted {
		/// Primary sink failure.
		primary: Box<AuditError>,
		/// Fallback sink failure.
		fallback: Box<AuditError>,
	},
}

/// Client assertion summary; the assertion itself is only kept as a digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionAudit {
	/// Assertion `jti`.
	pub jwt_id: String,
	/// Assertion `iat`.
	pub issued_at: i64,
	/// Assertion `exp`.
	pub expiration_time: i64,
	/// Assertion `iss`.
	pub issuer: String,
	/// Assertion `aud`.
	pub audience: Vec<String>,
	/// Assertion signing algorithm.
	pub algorithm: String,
	/// Key the assertion was signed with.
	pub key_id: KeyId,
	/// Hex-encoded SHA-256 of the compact assertion.
	pub sha256: String,
}

/// Issuance details carried by an audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPayload {
	/// Access token `jti`.
	pub jwt_id: String,
	/// Client the token was minted for.
	pub client_id: ClientId,
	/// Tenant owning the client.
	pub organization_id: TenantId,
	/// Access token audience.
	pub audience: Vec<String>,
	/// Access token `iat`.
	pub issued_at: i64,
	/// Access token `nbf`.
	pub not_before: i64,
	/// Access token `exp`.
	pub expiration_time: i64,
	/// Access token `iss`.
	pub issuer: String,
	/// Purpose the token is scoped to, for consumer tokens.
	pub purpose_id: Option<PurposeId>,
	/// Purpose version active at issuance.
	pub purpose_version_id: Option<PurposeVersionId>,
	/// Agreement authorizing the token.
	pub agreement_id: Option<AgreementId>,
	/// E-service the token grants access to.
	pub eservice_id: Option<EServiceId>,
	/// Descriptor the audience was taken from.
	pub descriptor_id: Option<DescriptorId>,
	/// Client assertion summary.
	pub client_assertion: AssertionAudit,
}

/// Envelope shipped to audit sinks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
	/// Unique record identifier.
	pub message_id: Uuid,
	/// Record kind.
	pub kind: String,
	/// Identifier of what triggered the record (the assertion `jti`).
	pub source_event_id: String,
	/// Emission instant.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	/// Issuance details.
	pub payload: AuditPayload,
}
impl AuditRecord {
	/// Builds the record for a freshly minted token.
	pub fn token_generated(
		assertion: &ValidatedAssertion,
		entry: &TokenGenStateEntry,
		token: &MintedToken,
		now: OffsetDateTime,
	) -> Self {
		let claims = &token.claims;
		let binding = entry.binding.as_ref();
		let agreement = binding.and_then(|binding| binding.agreement.as_ref());
		let assertion_claims = &assertion.claims;

		Self {
			message_id: Uuid::new_v4(),
			kind: TOKEN_GENERATED.into(),
			source_event_id: assertion_claims.jti.clone(),
			timestamp: now,
			payload: AuditPayload {
				jwt_id: claims.jti.clone(),
				client_id: claims.client_id.clone(),
				organization_id: entry.consumer_id.clone(),
				audience: claims.aud.clone(),
				issued_at: claims.iat,
				not_before: claims.nbf,
				expiration_time: claims.exp,
				issuer: claims.iss.clone(),
				purpose_id: claims.purpose_id.clone(),
				purpose_version_id: binding
					.and_then(|binding| binding.purpose.as_ref())
					.map(|purpose| purpose.value.version_id.clone()),
				agreement_id: agreement.map(|agreement| agreement.value.agreement_id.clone()),
				eservice_id: binding.and_then(|binding| binding.eservice_id.clone()),
				descriptor_id: agreement.map(|agreement| agreement.value.descriptor_id.clone()),
				client_assertion: AssertionAudit {
					jwt_id: assertion_claims.jti.clone(),
					issued_at: assertion_claims.iat,
					expiration_time: assertion_claims.exp,
					issuer: assertion_claims.iss.clone(),
					audience: assertion_claims.aud.clone(),
					algorithm: format!("{:?}", assertion.header.alg),
					key_id: assertion.header.kid.clone(),
					sha256: sha256_hex(assertion.compact()),
				},
			},
		}
	}

	fn to_json(&self) -> Result<Vec<u8>, AuditError> {
		serde_json::to_vec(self).map_err(|source| AuditError::Serialize { source })
	}
}

/// Destination for audit records.
pub trait AuditSink
where
	Self: Send + Sync,
{
	/// Delivers one record.
	fn emit<'a>(&'a self, record: &'a AuditRecord) -> AuditFuture<'a>;
}

/// Collects records in memory; can be switched into a failing mode.
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditSink {
	records: Arc<Mutex<Vec<AuditRecord>>>,
	failing: Arc<Mutex<Option<String>>>,
}
impl MemoryAuditSink {
	/// Creates a sink that rejects every record with `reason`.
	pub fn failing(reason: impl Into<String>) -> Self {
		let sink = Self::default();

		sink.fail_with(reason);

		sink
	}

	/// Makes subsequent deliveries fail.
	pub fn fail_with(&self, reason: impl Into<String>) {
		*self.failing.lock() = Some(reason.into());
	}

	/// Records accepted so far.
	pub fn records(&self) -> Vec<AuditRecord> {
		self.records.lock().clone()
	}
}
impl AuditSink for MemoryAuditSink {
	fn emit<'a>(&'a self, record: &'a AuditRecord) -> AuditFuture<'a> {
		Box::pin(async move {
			if let Some(reason) = self.failing.lock().clone() {
				return Err(AuditError::Unavailable { reason });
			}

			self.records.lock().push(record.clone());

			Ok(AuditStatus::Delivered)
		})
	}
}

/// Appends records as JSON lines to a local file.
#[derive(Debug)]
pub struct FileAuditSink {
	path: PathBuf,
	append: AsyncMutex<()>,
}
impl FileAuditSink {
	/// Creates a sink writing to `path`; the file is created on first use.
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self { path: path.as_ref().to_path_buf(), append: AsyncMutex::new(()) }
	}

	/// Path records are appended to.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn append_line(&self, line: &[u8]) -> Result<(), AuditError> {
		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.map_err(|source| AuditError::Io { source })?;

		file.write_all(line)
			.and_then(|()| file.write_all(b"\n"))
			.and_then(|()| file.flush())
			.map_err(|source| AuditError::Io { source })
	}
}
impl AuditSink for FileAuditSink {
	fn emit<'a>(&'a self, record: &'a AuditRecord) -> AuditFuture<'a> {
		Box::pin(async move {
			let line = record.to_json()?;
			let _append = self.append.lock().await;

			self.append_line(&line)?;

			Ok(AuditStatus::Delivered)
		})
	}
}

/// POSTs records as JSON to an HTTP endpoint.
///
/// Redirects are not followed; an audit endpoint answers directly or not at all.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestAuditSink {
	client: ReqwestClient,
	endpoint: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestAuditSink {
	/// Builds a sink with a dedicated client that never follows redirects.
	pub fn new(endpoint: Url) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_client(client, endpoint))
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient, endpoint: Url) -> Self {
		Self { client, endpoint }
	}
}
#[cfg(feature = "reqwest")]
impl AuditSink for ReqwestAuditSink {
	fn emit<'a>(&'a self, record: &'a AuditRecord) -> AuditFuture<'a> {
		Box::pin(async move {
			let body = record.to_json()?;
			let response = self
				.client
				.post(self.endpoint.clone())
				.header(CONTENT_TYPE, "application/json")
				.body(body)
				.send()
				.await
				.map_err(|source| AuditError::Transport { source })?;
			let status = response.status();

			if !status.is_success() {
				return Err(AuditError::Rejected {
					status: status.as_u16(),
					retry_after: parse_retry_after(response.headers()),
				});
			}

			Ok(AuditStatus::Delivered)
		})
	}
}

/// Tries the primary sink, then the fallback sink.
#[derive(Clone)]
pub struct FallbackAuditSink {
	primary: Arc<dyn AuditSink>,
	fallback: Arc<dyn AuditSink>,
}
impl FallbackAuditSink {
	/// Pairs a primary sink with its fallback.
	pub fn new(primary: Arc<dyn AuditSink>, fallback: Arc<dyn AuditSink>) -> Self {
		Self { primary, fallback }
	}
}
impl AuditSink for FallbackAuditSink {
	fn emit<'a>(&'a self, record: &'a AuditRecord) -> AuditFuture<'a> {
		Box::pin(async move {
			let primary = match self.primary.emit(record).await {
				Ok(_) => return Ok(AuditStatus::Delivered),
				Err(e) => e,
			};

			obs::trace_audit_degraded(AuditStatus::Fallback.as_str(), &primary);

			match self.fallback.emit(record).await {
				Ok(_) => Ok(AuditStatus::Fallback),
				Err(fallback) => Err(AuditError::Exhausted {
					primary: Box::new(primary),
					fallback: Box::new(fallback),
				}),
			}
		})
	}
}
impl Debug for FallbackAuditSink {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("FallbackAuditSink(..)")
	}
}

fn sha256_hex(input: &str) -> String {
	Sha256::digest(input.as_bytes()).iter().fold(String::with_capacity(64), |mut hex, byte| {
		let _ = write!(hex, "{byte:02x}");

		hex
	})
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<i64>() {
		return Some(Duration::seconds(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
