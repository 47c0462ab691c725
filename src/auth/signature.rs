//! Cryptographic verification of client assertions against registered public keys.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
// self
use crate::{_prelude::*, auth::ValidatedAssertion};

/// Reasons a client assertion signature was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum SignatureError {
	/// `exp` is in the past (beyond the leeway).
	#[error("Client assertion has expired.")]
	Expired,
	/// `nbf` is in the future (beyond the leeway).
	#[error("Client assertion is not yet valid.")]
	NotYetValid,
	/// The token or its claims could not be decoded for verification.
	#[error("Client assertion signature is malformed.")]
	Malformed,
	/// The signature does not match the registered key.
	#[error("Client assertion signature does not match the registered key.")]
	Mismatch,
	/// The header algorithm differs from the algorithm registered with the key.
	#[error("Client assertion declares {declared}, but the key is registered for {registered}.")]
	AlgorithmMismatch {
		/// Algorithm from the assertion header.
		declared: String,
		/// Algorithm stored with the key.
		registered: String,
	},
	/// The registered public key cannot be decoded.
	#[error("Registered public key is invalid.")]
	InvalidPublicKey,
}

/// Time and audience rules for signature verification.
#[derive(Clone, Copy, Debug)]
pub struct SignaturePolicy<'a> {
	/// Accepted assertion audiences.
	pub audiences: &'a [String],
	/// Tolerated clock skew, in seconds.
	pub leeway: u64,
}

/// Decodes a stored public key (base64 of the PEM document) for the registered algorithm.
pub fn decoding_key(encoded: &str, algorithm: Algorithm) -> Result<DecodingKey, SignatureError> {
	let pem = STANDARD.decode(encoded.trim()).map_err(|_| SignatureError::InvalidPublicKey)?;
	let key = match algorithm {
		Algorithm::RS256
		| Algorithm::RS384
		| Algorithm::RS512
		| Algorithm::PS256
		| Algorithm::PS384
		| Algorithm::PS512 => DecodingKey::from_rsa_pem(&pem),
		Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
		Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
		Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 =>
			return Err(SignatureError::InvalidPublicKey),
	};

	key.map_err(|_| SignatureError::InvalidPublicKey)
}

/// Verifies the assertion with the key and algorithm registered for it.
///
/// The header algorithm is never trusted on its own: it must equal `registered`, which is the
/// only algorithm the verifier accepts.
pub fn verify_signature(
	assertion: &ValidatedAssertion,
	public_key: &str,
	registered: Algorithm,
	policy: SignaturePolicy<'_>,
) -> Result<(), SignatureError> {
	if assertion.header.alg != registered {
		return Err(SignatureError::AlgorithmMismatch {
			declared: format!("{:?}", assertion.header.alg),
			registered: format!("{registered:?}"),
		});
	}

	let key = decoding_key(public_key, registered)?;
	let mut validation = Validation::new(registered);

	validation.leeway = policy.leeway;
	validation.validate_nbf = true;
	validation.set_audience(policy.audiences);
	validation.set_required_spec_claims(&["exp"]);

	jsonwebtoken::decode::<serde_json::Value>(assertion.compact(), &key, &validation)
		.map(|_| ())
		.map_err(|e| match e.kind() {
			ErrorKind::ExpiredSignature => SignatureError::Expired,
			ErrorKind::ImmatureSignature => SignatureError::NotYetValid,
			ErrorKind::InvalidSignature => SignatureError::Mismatch,
			ErrorKind::InvalidAlgorithm => SignatureError::AlgorithmMismatch {
				declared: format!("{:?}", assertion.header.alg),
				registered: format!("{registered:?}"),
			},
			ErrorKind::InvalidRsaKey(_)
			| ErrorKind::InvalidEcdsaKey
			| ErrorKind::InvalidKeyFormat => SignatureError::InvalidPublicKey,
			_ => SignatureError::Malformed,
		})
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::{EncodingKey, Header};
	use serde_json::json;
	// self
	use super::*;
	use crate::auth::{AssertionPolicy, AssertionRequest, CLIENT_ASSERTION_TYPE, validate_request};

	const CLIENT_PRIVATE: &str = include_str!("../../tests/fixtures/client_private.pem");
	const CLIENT_PUBLIC: &str = include_str!("../../tests/fixtures/client_public.pem");
	const ROGUE_PRIVATE: &str = include_str!("../../tests/fixtures/rogue_private.pem");
	const CLIENT: &str = "5c1d2c3e-7f3a-4c8e-9a61-0b9b8f6f2a10";
	const AUDIENCE: &str = "auth.example/client-assertion";

	fn sign(private_pem: &str, iat_offset: i64, exp_offset: i64, nbf_offset: i64) -> String {
		let now = OffsetDateTime::now_utc().unix_timestamp();
		let mut header = Header::new(Algorithm::RS256);

		header.kid = Some("kid-1".into());

		let claims = json!({
			"iss": CLIENT,
			"sub": CLIENT,
			"aud": [AUDIENCE],
			"jti": "assertion-1",
			"iat": now + iat_offset,
			"nbf": now + nbf_offset,
			"exp": now + exp_offset,
		});
		let key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
			.expect("Fixture private key should load.");

		jsonwebtoken::encode(&header, &claims, &key).expect("Fixture assertion should sign.")
	}

	fn validated(compact: &str) -> ValidatedAssertion {
		let audiences = vec![AUDIENCE.to_owned()];

		validate_request(
			AssertionRequest {
				client_id: Some(CLIENT),
				client_assertion_type: CLIENT_ASSERTION_TYPE,
				client_assertion: compact,
				grant_type: "client_credentials",
			},
			AssertionPolicy { audiences: &audiences, allowed_algorithms: &[Algorithm::RS256] },
		)
		.expect("Fixture assertion should be structurally valid.")
	}

	fn verify(compact: &str, registered: Algorithm) -> Result<(), SignatureError> {
		let audiences = vec![AUDIENCE.to_owned()];
		let public_key = STANDARD.encode(CLIENT_PUBLIC);

		verify_signature(
			&validated(compact),
			&public_key,
			registered,
			SignaturePolicy { audiences: &audiences, leeway: 5 },
		)
	}

	#[test]
	fn valid_signature_is_accepted() {
		assert_eq!(verify(&sign(CLIENT_PRIVATE, 0, 60, 0), Algorithm::RS256), Ok(()));
	}

	#[test]
	fn time_window_and_key_failures_are_distinguished() {
		assert_eq!(
			verify(&sign(CLIENT_PRIVATE, -600, -300, -600), Algorithm::RS256),
			Err(SignatureError::Expired)
		);
		assert_eq!(
			verify(&sign(CLIENT_PRIVATE, 0, 600, 300), Algorithm::RS256),
			Err(SignatureError::NotYetValid)
		);
		assert_eq!(
			verify(&sign(ROGUE_PRIVATE, 0, 60, 0), Algorithm::RS256),
			Err(SignatureError::Mismatch)
		);
		assert!(matches!(
			verify(&sign(CLIENT_PRIVATE, 0, 60, 0), Algorithm::RS512),
			Err(SignatureError::AlgorithmMismatch { .. })
		));
	}

	#[test]
	fn undecodable_public_keys_are_reported() {
		assert!(matches!(
			decoding_key("not base64!", Algorithm::RS256),
			Err(SignatureError::InvalidPublicKey)
		));
		assert!(matches!(
			decoding_key(&STANDARD.encode("-----BEGIN PUBLIC KEY-----"), Algorithm::RS256),
			Err(SignatureError::InvalidPublicKey)
		));
	}
}
