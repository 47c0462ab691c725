//! Denormalized authorization state kept by the projection writers.
//!
//! [`platform`] mirrors the authorization-relevant state of agreements, descriptors, and
//! purposes. [`token_gen`] stores client signing keys together with a copy of the platform state
//! they depend on, so a token request needs a single point read.

pub mod platform;
pub mod token_gen;

pub use platform::*;
pub use token_gen::*;

// self
use crate::_prelude::*;

/// Authorization-relevant state of an upstream entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
	/// The entity currently grants access.
	Active,
	/// The entity exists but does not grant access.
	Inactive,
}
impl ItemState {
	/// Maps an "is active" predicate onto a state.
	pub const fn from_active(active: bool) -> Self {
		if active { Self::Active } else { Self::Inactive }
	}

	/// Returns `true` for [`ItemState::Active`].
	pub const fn is_active(self) -> bool {
		matches!(self, Self::Active)
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Active => "ACTIVE",
			Self::Inactive => "INACTIVE",
		}
	}
}
impl Display for ItemState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Error raised when a rendered composite key cannot be parsed back.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Malformed state key: {key}.")]
pub struct KeyParseError {
	/// Offending rendered key.
	pub key: String,
}
impl KeyParseError {
	pub(crate) fn new(key: &str) -> Self {
		Self { key: key.to_owned() }
	}
}
