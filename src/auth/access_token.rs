//! Access-token claims, the signer seam, and the PEM-backed RSA signer.

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, KeyId, PurposeId, TenantId},
	error::ConfigError,
};

/// `typ` header of minted access tokens.
pub const ACCESS_TOKEN_TYPE: &str = "at+jwt";

/// Boxed future returned by [`TokenSigner`] implementations.
pub type SignerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SigningError>> + 'a + Send>>;

/// Failures raised while signing an access token.
#[derive(Debug, ThisError)]
pub enum SigningError {
	/// The signing backend rejected the claims or the key.
	#[error("Access token could not be signed.")]
	Encode {
		/// Underlying encoder failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	/// A remote signing backend is unavailable.
	#[error("Signing backend unavailable: {message}.")]
	Unavailable {
		/// Human-readable error payload.
		message: String,
	},
}

/// Claims of an issued access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
	/// Issuer.
	pub iss: String,
	/// Subject (the client).
	pub sub: String,
	/// Audiences allowed to accept the token.
	pub aud: Vec<String>,
	/// Client the token was issued to.
	#[serde(rename = "client_id")]
	pub client_id: ClientId,
	/// Purpose the token was issued for (consumer clients).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub purpose_id: Option<PurposeId>,
	/// Tenant owning the client (consumer clients).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub organization_id: Option<TenantId>,
	/// Unique token id.
	pub jti: String,
	/// Issued-at, seconds since the epoch.
	pub iat: i64,
	/// Not-before, seconds since the epoch.
	pub nbf: i64,
	/// Expiry, seconds since the epoch.
	pub exp: i64,
}
impl AccessTokenClaims {
	/// Builds claims with a fresh `jti`, valid from `now` for `lifespan_secs`.
	pub fn issue(
		issuer: &str,
		client_id: &ClientId,
		aud: Vec<String>,
		lifespan_secs: u32,
		now: OffsetDateTime,
	) -> Self {
		let iat = now.unix_timestamp();

		Self {
			iss: issuer.to_owned(),
			sub: client_id.to_string(),
			aud,
			client_id: client_id.clone(),
			purpose_id: None,
			organization_id: None,
			jti: Uuid::new_v4().to_string(),
			iat,
			nbf: iat,
			exp: iat + i64::from(lifespan_secs),
		}
	}

	/// Scopes the token to a consumer purpose.
	pub fn with_purpose(mut self, purpose_id: PurposeId, organization_id: TenantId) -> Self {
		self.purpose_id = Some(purpose_id);
		self.organization_id = Some(organization_id);

		self
	}

	/// Seconds between `iat` and `exp`.
	pub fn expires_in(&self) -> u64 {
		u64::try_from(self.exp - self.iat).unwrap_or_default()
	}
}

/// A signed access token; the serialized form never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct MintedToken {
	serialized: String,
	/// Claims the token was signed with.
	pub claims: AccessTokenClaims,
}
impl MintedToken {
	/// Wraps a serialized token produced by a signer.
	pub fn new(serialized: String, claims: AccessTokenClaims) -> Self {
		Self { serialized, claims }
	}

	/// Returns the compact serialization for the token response.
	pub fn expose(&self) -> &str {
		&self.serialized
	}
}
impl Debug for MintedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MintedToken")
			.field("serialized", &"<redacted>")
			.field("claims", &self.claims)
			.finish()
	}
}
impl Display for MintedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Signing backend for access tokens; local keys and remote KMS signers implement it.
pub trait TokenSigner
where
	Self: Send + Sync,
{
	/// Identifier placed in the `kid` header.
	fn kid(&self) -> &KeyId;

	/// Signs the claims.
	fn sign(&self, claims: AccessTokenClaims) -> SignerFuture<'_, MintedToken>;
}

/// Signs access tokens locally with an RSA private key loaded from PEM.
#[derive(Clone)]
pub struct PemTokenSigner {
	kid: KeyId,
	algorithm: Algorithm,
	key: EncodingKey,
}
impl PemTokenSigner {
	/// Loads a PKCS#1 or PKCS#8 RSA private key and signs with `RS256`.
	pub fn from_rsa_pem(kid: KeyId, pem: &[u8]) -> Result<Self, ConfigError> {
		let key = EncodingKey::from_rsa_pem(pem)
			.map_err(|source| ConfigError::InvalidSigningKey { source })?;

		Ok(Self { kid, algorithm: Algorithm::RS256, key })
	}

	fn header(&self) -> Header {
		let mut header = Header::new(self.algorithm);

		header.kid = Some(self.kid.to_string());
		header.typ = Some(ACCESS_TOKEN_TYPE.into());

		header
	}
}
impl TokenSigner for PemTokenSigner {
	fn kid(&self) -> &KeyId {
		&self.kid
	}

	fn sign(&self, claims: AccessTokenClaims) -> SignerFuture<'_, MintedToken> {
		Box::pin(async move {
			let serialized = jsonwebtoken::encode(&self.header(), &claims, &self.key)
				.map_err(|source| SigningError::Encode { source })?;

			Ok(MintedToken::new(serialized, claims))
		})
	}
}
impl Debug for PemTokenSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PemTokenSigner")
			.field("kid", &self.kid)
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}
