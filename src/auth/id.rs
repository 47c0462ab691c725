//! Strongly typed identifiers enforced across the engine domain.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use uuid::Uuid;
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $validate:path) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				$validate($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				$validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const KEY_ID_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, purpose, key, ...).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, purpose, key, ...).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, purpose, key, ...).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// The identifier is not a hyphenated UUID.
	#[error("{kind} identifier is not a valid UUID.")]
	NotUuid {
		/// Kind of identifier (client, purpose, key, ...).
		kind: &'static str,
	},
}

def_id! { ClientId, "Identifier of an OAuth client owned by a consumer.", "Client", validate_uuid }
def_id! { TenantId, "Identifier of a consumer or producer tenant.", "Tenant", validate_uuid }
def_id! { PurposeId, "Identifier of a consumer purpose.", "Purpose", validate_uuid }
def_id! { PurposeVersionId, "Identifier of a purpose version.", "PurposeVersion", validate_uuid }
def_id! { AgreementId, "Identifier of a consumer/e-service agreement.", "Agreement", validate_uuid }
def_id! { EServiceId, "Identifier of a catalog e-service.", "EService", validate_uuid }
def_id! { DescriptorId, "Identifier of an e-service descriptor.", "Descriptor", validate_uuid }
def_id! { KeyId, "Identifier (`kid`) of a client signing key.", "Key", validate_key_id }

fn validate_uuid(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	// Only the canonical hyphenated form; `Uuid::parse_str` alone also accepts braces and URNs.
	if view.len() != 36 || Uuid::try_parse(view).is_err() {
		return Err(IdentifierError::NotUuid { kind });
	}

	Ok(())
}

fn validate_key_id(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > KEY_ID_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: KEY_ID_MAX_LEN });
	}

	Ok(())
}
