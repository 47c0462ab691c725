//! Structural validation of token requests and compact client assertions.
//!
//! Every independent check runs even when an earlier one failed, so callers receive the complete
//! list of problems in one pass. Only claims that depend on a decodable token are skipped when
//! the compact serialization itself is broken.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, KeyId, PurposeId},
};

/// Required `client_assertion_type` value.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Required `grant_type` value.
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";
/// Only digest algorithm accepted in the optional `digest` claim.
pub const DIGEST_ALGORITHM: &str = "SHA256";
/// Hex length of a SHA-256 digest value.
pub const DIGEST_VALUE_LEN: usize = 64;

type JsonObject = Map<String, Value>;

/// A single structural problem found in a token request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum AssertionError {
	/// `client_assertion_type` is not the jwt-bearer constant.
	#[error("Unexpected client assertion type: {value}.")]
	InvalidAssertionType {
		/// Supplied value.
		value: String,
	},
	/// `grant_type` is not `client_credentials`.
	#[error("Unexpected grant type: {value}.")]
	InvalidGrantType {
		/// Supplied value.
		value: String,
	},
	/// `client_id` is not a valid client identifier.
	#[error("Client id {value} is not a valid identifier.")]
	InvalidClientId {
		/// Supplied value.
		value: String,
	},
	/// The compact serialization cannot be decoded.
	#[error("Client assertion is not a valid compact JWT: {reason}.")]
	InvalidFormat {
		/// What part of the structure is broken.
		reason: &'static str,
	},
	/// `jti` is absent or not a non-empty string.
	#[error("The jti claim is missing.")]
	MissingJti,
	/// `iat` is absent.
	#[error("The iat claim is missing.")]
	MissingIat,
	/// `iat` is not an integer timestamp.
	#[error("The iat claim must be a numeric timestamp.")]
	InvalidIat,
	/// `exp` is absent.
	#[error("The exp claim is missing.")]
	MissingExp,
	/// `exp` is not an integer timestamp.
	#[error("The exp claim must be a numeric timestamp.")]
	InvalidExp,
	/// `iss` is absent or empty.
	#[error("The iss claim is missing.")]
	MissingIssuer,
	/// `sub` is absent or empty.
	#[error("The sub claim is missing.")]
	MissingSubject,
	/// `sub` is not a client identifier.
	#[error("The sub claim {value} is not a valid client id.")]
	InvalidSubject {
		/// Supplied value.
		value: String,
	},
	/// `sub` differs from the `client_id` sent with the request.
	#[error("The sub claim {actual} does not match client id {expected}.")]
	SubjectMismatch {
		/// Client id from the request.
		expected: String,
		/// Subject from the assertion.
		actual: String,
	},
	/// `aud` is absent.
	#[error("The aud claim is missing.")]
	MissingAudience,
	/// `aud` is not an array of strings.
	#[error("The aud claim must be an array of strings.")]
	InvalidAudienceFormat,
	/// `aud` does not contain any accepted audience.
	#[error("The aud claim does not contain an accepted audience.")]
	InvalidAudience,
	/// `purposeId` is present but malformed.
	#[error("The purposeId claim {value} is not a valid purpose id.")]
	InvalidPurposeId {
		/// Supplied value, rendered as JSON when not a string.
		value: String,
	},
	/// Header lacks `kid`.
	#[error("The kid header is missing.")]
	MissingKid,
	/// Header `kid` is malformed.
	#[error("The kid header is not a valid key id.")]
	InvalidKid,
	/// Header lacks `alg`.
	#[error("The alg header is missing.")]
	MissingAlgorithm,
	/// Header `alg` is unknown or not accepted.
	#[error("Algorithm {alg} is not allowed.")]
	AlgorithmNotAllowed {
		/// Supplied value.
		alg: String,
	},
	/// `digest` is not an object with string `alg` and `value`.
	#[error("The digest claim is malformed.")]
	InvalidDigestFormat,
	/// `digest.alg` is not SHA256.
	#[error("Digest algorithm {alg} is not supported.")]
	InvalidDigestAlgorithm {
		/// Supplied value.
		alg: String,
	},
	/// `digest.value` has the wrong length.
	#[error("Digest value has length {len}, expected 64.")]
	InvalidDigestLength {
		/// Supplied length.
		len: usize,
	},
}

/// Every structural problem found in one token request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssertionErrors(pub Vec<AssertionError>);
impl AssertionErrors {
	/// Returns `true` when the list contains the provided error.
	pub fn contains(&self, error: &AssertionError) -> bool {
		self.0.contains(error)
	}

	/// Iterator over the collected errors.
	pub fn iter(&self) -> impl Iterator<Item = &AssertionError> {
		self.0.iter()
	}
}
impl Display for AssertionErrors {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Client assertion validation failed:")?;

		for error in &self.0 {
			write!(f, " {error}")?;
		}

		Ok(())
	}
}
impl StdError for AssertionErrors {}

/// Raw fields of a token request, as received on the wire.
#[derive(Clone, Copy, Debug)]
pub struct AssertionRequest<'a> {
	/// Optional client id sent alongside the assertion.
	pub client_id: Option<&'a str>,
	/// Must equal [`CLIENT_ASSERTION_TYPE`].
	pub client_assertion_type: &'a str,
	/// Compact serialized assertion.
	pub client_assertion: &'a str,
	/// Must equal [`CLIENT_CREDENTIALS_GRANT`].
	pub grant_type: &'a str,
}

/// Acceptance rules applied to assertions.
#[derive(Clone, Copy, Debug)]
pub struct AssertionPolicy<'a> {
	/// At least one of these must appear in `aud`.
	pub audiences: &'a [String],
	/// Accepted header algorithms.
	pub allowed_algorithms: &'a [Algorithm],
}

/// Decoded assertion header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionHeader {
	/// Key identifier used to resolve the signing key.
	pub kid: KeyId,
	/// Declared signature algorithm.
	pub alg: Algorithm,
}

/// Optional request-body digest bound into the assertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionDigest {
	/// Always [`DIGEST_ALGORITHM`].
	pub alg: String,
	/// Hex-encoded digest.
	pub value: String,
}

/// Decoded and structurally valid assertion claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionClaims {
	/// Issuer, normally the client id.
	pub iss: String,
	/// Subject; identifies the client.
	pub sub: ClientId,
	/// Audiences declared by the client.
	pub aud: Vec<String>,
	/// Issued-at, seconds since the epoch.
	pub iat: i64,
	/// Expiry, seconds since the epoch.
	pub exp: i64,
	/// Unique assertion id.
	pub jti: String,
	/// Purpose the token is requested for (consumer clients).
	pub purpose_id: Option<PurposeId>,
	/// Optional request digest.
	pub digest: Option<AssertionDigest>,
}

/// A client assertion that passed every structural check.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedAssertion {
	/// Decoded header.
	pub header: AssertionHeader,
	/// Decoded claims.
	pub claims: AssertionClaims,
	compact: String,
}
impl ValidatedAssertion {
	/// Client the assertion was issued by.
	pub fn client_id(&self) -> &ClientId {
		&self.claims.sub
	}

	/// Compact serialization for signature verification. Callers must avoid logging it.
	pub fn compact(&self) -> &str {
		&self.compact
	}
}
impl Debug for ValidatedAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ValidatedAssertion")
			.field("header", &self.header)
			.field("claims", &self.claims)
			.field("compact", &"<redacted>")
			.finish()
	}
}

/// Runs every structural check against a token request.
pub fn validate_request(
	request: AssertionRequest<'_>,
	policy: AssertionPolicy<'_>,
) -> Result<ValidatedAssertion, AssertionErrors> {
	let mut errors = Vec::new();

	keep(&mut errors, check_assertion_type(request.client_assertion_type));
	keep(&mut errors, check_grant_type(request.grant_type));

	let expected_client = keep(&mut errors, check_client_id(request.client_id)).flatten();
	let Some((header, payload)) = keep(&mut errors, decode_compact(request.client_assertion))
	else {
		return Err(AssertionErrors(errors));
	};
	let kid = keep(&mut errors, check_kid(&header));
	let alg = keep(&mut errors, check_algorithm(&header, policy.allowed_algorithms));
	let jti = keep(&mut errors, check_jti(&payload));
	let iat = keep(&mut errors, check_timestamp(&payload, "iat"));
	let exp = keep(&mut errors, check_timestamp(&payload, "exp"));
	let iss = keep(&mut errors, check_issuer(&payload));
	let sub = keep(&mut errors, check_subject(&payload, expected_client.as_ref()));
	let aud = keep(&mut errors, check_audience(&payload, policy.audiences));
	let purpose_id = keep(&mut errors, check_purpose_id(&payload));
	let digest = keep(&mut errors, check_digest(&payload));

	match (kid, alg, jti, iat, exp, iss, sub, aud, purpose_id, digest) {
		(
			Some(kid),
			Some(alg),
			Some(jti),
			Some(iat),
			Some(exp),
			Some(iss),
			Some(sub),
			Some(aud),
			Some(purpose_id),
			Some(digest),
		) if errors.is_empty() => Ok(ValidatedAssertion {
			header: AssertionHeader { kid, alg },
			claims: AssertionClaims { iss, sub, aud, iat, exp, jti, purpose_id, digest },
			compact: request.client_assertion.to_owned(),
		}),
		_ => Err(AssertionErrors(errors)),
	}
}

fn keep<T>(errors: &mut Vec<AssertionError>, result: Result<T, AssertionError>) -> Option<T> {
	match result {
		Ok(value) => Some(value),
		Err(e) => {
			errors.push(e);

			None
		},
	}
}

fn check_assertion_type(value: &str) -> Result<(), AssertionError> {
	if value == CLIENT_ASSERTION_TYPE {
		Ok(())
	} else {
		Err(AssertionError::InvalidAssertionType { value: value.to_owned() })
	}
}

fn check_grant_type(value: &str) -> Result<(), AssertionError> {
	if value == CLIENT_CREDENTIALS_GRANT {
		Ok(())
	} else {
		Err(AssertionError::InvalidGrantType { value: value.to_owned() })
	}
}

fn check_client_id(value: Option<&str>) -> Result<Option<ClientId>, AssertionError> {
	value
		.map(|raw| {
			ClientId::new(raw)
				.map_err(|_| AssertionError::InvalidClientId { value: raw.to_owned() })
		})
		.transpose()
}

fn decode_compact(compact: &str) -> Result<(JsonObject, JsonObject), AssertionError> {
	let mut segments = compact.split('.');
	let (Some(header), Some(payload), Some(signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return Err(AssertionError::InvalidFormat { reason: "expected three segments" });
	};

	if URL_SAFE_NO_PAD.decode(signature).is_err() {
		return Err(AssertionError::InvalidFormat { reason: "signature is not base64url" });
	}

	Ok((decode_object(header, "header")?, decode_object(payload, "payload")?))
}

fn decode_object(segment: &str, part: &'static str) -> Result<JsonObject, AssertionError> {
	let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| AssertionError::InvalidFormat {
		reason: if part == "header" {
			"header is not base64url"
		} else {
			"payload is not base64url"
		},
	})?;

	match serde_json::from_slice::<Value>(&bytes) {
		Ok(Value::Object(object)) => Ok(object),
		_ => Err(AssertionError::InvalidFormat {
			reason: if part == "header" {
				"header is not a JSON object"
			} else {
				"payload is not a JSON object"
			},
		}),
	}
}

fn non_empty_str<'a>(object: &'a JsonObject, field: &str) -> Option<&'a str> {
	object.get(field).and_then(Value::as_str).filter(|value| !value.is_empty())
}

fn check_kid(header: &JsonObject) -> Result<KeyId, AssertionError> {
	match header.get("kid") {
		None | Some(Value::Null) => Err(AssertionError::MissingKid),
		Some(Value::String(kid)) => KeyId::new(kid).map_err(|_| AssertionError::InvalidKid),
		Some(_) => Err(AssertionError::InvalidKid),
	}
}

fn check_algorithm(
	header: &JsonObject,
	allowed: &[Algorithm],
) -> Result<Algorithm, AssertionError> {
	let raw = match header.get("alg") {
		None | Some(Value::Null) => return Err(AssertionError::MissingAlgorithm),
		Some(Value::String(raw)) => raw.as_str(),
		Some(other) => return Err(AssertionError::AlgorithmNotAllowed { alg: other.to_string() }),
	};

	Algorithm::from_str(raw)
		.ok()
		.filter(|alg| allowed.contains(alg))
		.ok_or_else(|| AssertionError::AlgorithmNotAllowed { alg: raw.to_owned() })
}

fn check_jti(payload: &JsonObject) -> Result<String, AssertionError> {
	non_empty_str(payload, "jti").map(str::to_owned).ok_or(AssertionError::MissingJti)
}

fn check_timestamp(payload: &JsonObject, claim: &'static str) -> Result<i64, AssertionError> {
	let (missing, invalid) = match claim {
		"iat" => (AssertionError::MissingIat, AssertionError::InvalidIat),
		_ => (AssertionError::MissingExp, AssertionError::InvalidExp),
	};

	match payload.get(claim) {
		None | Some(Value::Null) => Err(missing),
		Some(value) => value.as_i64().ok_or(invalid),
	}
}

fn check_issuer(payload: &JsonObject) -> Result<String, AssertionError> {
	non_empty_str(payload, "iss").map(str::to_owned).ok_or(AssertionError::MissingIssuer)
}

fn check_subject(
	payload: &JsonObject,
	expected: Option<&ClientId>,
) -> Result<ClientId, AssertionError> {
	let raw = non_empty_str(payload, "sub").ok_or(AssertionError::MissingSubject)?;
	let sub =
		ClientId::new(raw).map_err(|_| AssertionError::InvalidSubject { value: raw.to_owned() })?;

	match expected {
		Some(expected) if expected != &sub => Err(AssertionError::SubjectMismatch {
			expected: expected.to_string(),
			actual: sub.to_string(),
		}),
		_ => Ok(sub),
	}
}

fn check_audience(
	payload: &JsonObject,
	accepted: &[String],
) -> Result<Vec<String>, AssertionError> {
	let entries = match payload.get("aud") {
		None | Some(Value::Null) => return Err(AssertionError::MissingAudience),
		Some(Value::Array(entries)) => entries,
		Some(_) => return Err(AssertionError::InvalidAudienceFormat),
	};
	let aud = entries
		.iter()
		.map(|entry| entry.as_str().map(str::to_owned))
		.collect::<Option<Vec<_>>>()
		.ok_or(AssertionError::InvalidAudienceFormat)?;

	if aud.iter().any(|value| accepted.contains(value)) {
		Ok(aud)
	} else {
		Err(AssertionError::InvalidAudience)
	}
}

fn check_purpose_id(payload: &JsonObject) -> Result<Option<PurposeId>, AssertionError> {
	match payload.get("purposeId") {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(raw)) => PurposeId::new(raw)
			.map(Some)
			.map_err(|_| AssertionError::InvalidPurposeId { value: raw.to_owned() }),
		Some(other) => Err(AssertionError::InvalidPurposeId { value: other.to_string() }),
	}
}

fn check_digest(payload: &JsonObject) -> Result<Option<AssertionDigest>, AssertionError> {
	let object = match payload.get("digest") {
		None | Some(Value::Null) => return Ok(None),
		Some(Value::Object(object)) => object,
		Some(_) => return Err(AssertionError::InvalidDigestFormat),
	};
	let (Some(alg), Some(value)) =
		(object.get("alg").and_then(Value::as_str), object.get("value").and_then(Value::as_str))
	else {
		return Err(AssertionError::InvalidDigestFormat);
	};

	if alg != DIGEST_ALGORITHM {
		return Err(AssertionError::InvalidDigestAlgorithm { alg: alg.to_owned() });
	}
	if value.len() != DIGEST_VALUE_LEN {
		return Err(AssertionError::InvalidDigestLength { len: value.len() });
	}

	Ok(Some(AssertionDigest { alg: alg.to_owned(), value: value.to_owned() }))
}
