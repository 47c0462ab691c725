//! Token issuance: validate the client assertion, authorize it against the token-generation
//! table, mint an access token, and audit it.
//!
//! The pipeline is terminal on the first failure and performs point reads only; the audit record
//! is the single side effect and never turns a minted token into an error.

pub mod audit;

pub use audit::*;

// self
use crate::{
	_prelude::*,
	auth::{
		self, AccessTokenClaims, AssertionPolicy, AssertionRequest, Entitlement, MintedToken,
		SignaturePolicy, TokenSigner, ValidatedAssertion,
	},
	config::IssuerConfig,
	obs::{self, IssuanceOutcome, Pipeline, PipelineSpan},
	state::{TokenGenStateEntry, TokenGenStateKey},
	store::StoreClient,
};

/// `token_type` of issued tokens.
pub const BEARER: &str = "Bearer";

/// A `client_credentials` request authenticated by a client assertion.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
	/// Client identifier, optional; must match the assertion subject when present.
	#[serde(default)]
	pub client_id: Option<String>,
	/// Must be the JWT-bearer assertion type.
	#[serde(default)]
	pub client_assertion_type: String,
	/// Compact-serialized client assertion.
	#[serde(default)]
	pub client_assertion: String,
	/// Must be `client_credentials`.
	#[serde(default)]
	pub grant_type: String,
}
impl TokenRequest {
	/// Builds a well-formed request around a client assertion.
	pub fn new(client_assertion: impl Into<String>) -> Self {
		Self {
			client_id: None,
			client_assertion_type: auth::CLIENT_ASSERTION_TYPE.into(),
			client_assertion: client_assertion.into(),
			grant_type: auth::CLIENT_CREDENTIALS_GRANT.into(),
		}
	}

	/// Sets the optional `client_id` parameter.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	fn as_assertion_request(&self) -> AssertionRequest<'_> {
		AssertionRequest {
			client_id: self.client_id.as_deref(),
			client_assertion_type: &self.client_assertion_type,
			client_assertion: &self.client_assertion,
			grant_type: &self.grant_type,
		}
	}
}
impl Debug for TokenRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRequest")
			.field("client_id", &self.client_id)
			.field("client_assertion_type", &self.client_assertion_type)
			.field("client_assertion", &"<redacted>")
			.field("grant_type", &self.grant_type)
			.finish()
	}
}

/// Successful issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
	/// Signed access token.
	pub token: MintedToken,
	/// Lifetime in seconds.
	pub expires_in: u64,
	/// Audit delivery outcome.
	pub audit: AuditStatus,
}

/// Authorizes token requests and mints access tokens.
pub struct TokenIssuer {
	config: IssuerConfig,
	stores: StoreClient,
	signer: Arc<dyn TokenSigner>,
	audit: Arc<dyn AuditSink>,
}
impl TokenIssuer {
	/// Wires the issuer to its configuration and collaborators.
	pub fn new(
		config: IssuerConfig,
		stores: StoreClient,
		signer: Arc<dyn TokenSigner>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self { config, stores, signer, audit }
	}

	/// Issuer configuration.
	pub fn config(&self) -> &IssuerConfig {
		&self.config
	}

	/// Runs the full pipeline for one request.
	pub async fn issue(&self, request: &TokenRequest) -> Result<IssuedToken> {
		let span = PipelineSpan::new(Pipeline::Issuance, "issue");

		obs::record_issuance(IssuanceOutcome::Attempt);

		let result = span.instrument(self.run(request)).await;

		obs::record_issuance(match result {
			Ok(_) => IssuanceOutcome::Success,
			Err(_) => IssuanceOutcome::Failure,
		});

		result
	}

	async fn run(&self, request: &TokenRequest) -> Result<IssuedToken> {
		let assertion = auth::validate_request(
			request.as_assertion_request(),
			AssertionPolicy {
				audiences: &self.config.audiences,
				allowed_algorithms: &self.config.allowed_algorithms,
			},
		)?;
		let entry = self.resolve_key(&assertion).await?;

		let policy =
			SignaturePolicy { audiences: &self.config.audiences, leeway: self.config.clock_leeway };

		auth::verify_signature(&assertion, &entry.public_key, entry.algorithm, policy)?;

		let entitlement = auth::check_entitlement(&entry, assertion.claims.purpose_id.as_ref())
			.map_err(|errors| {
				let reasons =
					errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");

				obs::trace_entitlement_denied(&entry.key, &reasons);

				Error::PlatformStateInvalid
			})?;
		let now = OffsetDateTime::now_utc();
		let token = self.signer.sign(self.claims(&assertion, entitlement, now)).await?;
		let record = AuditRecord::token_generated(&assertion, &entry, &token, now);
		let audit = self.emit_audit(&record).await;

		Ok(IssuedToken { expires_in: token.claims.expires_in(), token, audit })
	}

	// A purpose-scoped key wins over the purpose-less entry of the same key.
	async fn resolve_key(&self, assertion: &ValidatedAssertion) -> Result<TokenGenStateEntry> {
		let client_id = assertion.client_id();
		let kid = &assertion.header.kid;

		if let Some(purpose_id) = &assertion.claims.purpose_id {
			let key = TokenGenStateKey::client_kid_purpose(
				client_id.clone(),
				kid.clone(),
				purpose_id.clone(),
			);

			if let Some(entry) = self.stores.token_gen.get(&key).await? {
				return Ok(entry);
			}
		}

		let key = TokenGenStateKey::client_kid(client_id.clone(), kid.clone());

		self.stores.token_gen.get(&key).await?.ok_or_else(|| Error::TokenGenStateNotFound {
			client_id: client_id.to_string(),
			kid: kid.to_string(),
		})
	}

	fn claims(
		&self,
		assertion: &ValidatedAssertion,
		entitlement: Entitlement,
		now: OffsetDateTime,
	) -> AccessTokenClaims {
		let issuer = &self.config.issuer;
		let client_id = assertion.client_id();

		match entitlement {
			Entitlement::Api => AccessTokenClaims::issue(
				issuer,
				client_id,
				self.config.api_audience.clone(),
				self.config.api_token_lifespan,
				now,
			),
			Entitlement::Consumer { purpose_id, consumer_id, audience, voucher_lifespan } =>
				AccessTokenClaims::issue(issuer, client_id, audience, voucher_lifespan, now)
					.with_purpose(purpose_id, consumer_id),
		}
	}

	async fn emit_audit(&self, record: &AuditRecord) -> AuditStatus {
		let status = match self.audit.emit(record).await {
			Ok(status) => status,
			Err(e) => {
				obs::trace_audit_degraded(AuditStatus::Failed.as_str(), &e);

				AuditStatus::Failed
			},
		};

		if status.is_degraded() {
			obs::record_audit_degraded();
		}

		status
	}
}
impl Debug for TokenIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenIssuer")
			.field("issuer", &self.config.issuer)
			.field("signing_kid", self.signer.kid())
			.finish_non_exhaustive()
	}
}
