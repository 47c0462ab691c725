//! Inbound event envelopes and the closed event sets of each upstream family.
//!
//! An [`EventEnvelope`] carries the raw `type` discriminator and payload. Writers decode it into a
//! [`DomainEvent`] whose `kind` is a closed enum, so a new upstream event type must be added to
//! that enum (and therefore to every exhaustive `match` over it) before it can be processed.

pub mod agreement;
pub mod catalog;
pub mod client;
pub mod purpose;

pub use agreement::*;
pub use catalog::*;
pub use client::*;
pub use purpose::*;

// crates.io
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

macro_rules! event_kinds {
	(
		$(#[$meta:meta])*
		$name:ident, $family:expr, {
			$($(#[$vmeta:meta])* $variant:ident,)+
		}
	) => {
		$(#[$meta])*
		#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
		pub enum $name {
			$($(#[$vmeta])* $variant,)+
		}
		impl $name {
			/// Returns the wire discriminator of the event type.
			pub const fn as_str(self) -> &'static str {
				match self {
					$(Self::$variant => stringify!($variant),)+
				}
			}
		}
		impl $crate::events::EventKind for $name {
			const FAMILY: $crate::events::EventFamily = $family;

			fn parse(event_type: &str) -> Option<Self> {
				$(
					if event_type == stringify!($variant) {
						return Some(Self::$variant);
					}
				)+

				None
			}

			fn as_str(self) -> &'static str {
				$name::as_str(self)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(self.as_str())
			}
		}
	};
}
pub(crate) use event_kinds;

/// Upstream entity families, one projection writer each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFamily {
	/// E-services and their descriptors.
	Catalog,
	/// Agreements between consumers and e-services.
	Agreement,
	/// Consumer purposes.
	Purpose,
	/// OAuth clients and their keys.
	Client,
}
impl EventFamily {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Catalog => "catalog",
			Self::Agreement => "agreement",
			Self::Purpose => "purpose",
			Self::Client => "client",
		}
	}
}
impl Display for EventFamily {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Closed set of event types for one family.
pub trait EventKind
where
	Self: Copy + Debug + Send + Sync,
{
	/// Family the event types belong to.
	const FAMILY: EventFamily;

	/// Maps a wire discriminator onto a known event type.
	fn parse(event_type: &str) -> Option<Self>;

	/// Returns the wire discriminator.
	fn as_str(self) -> &'static str;
}

/// Failures raised while decoding an inbound event.
#[derive(Debug, ThisError)]
pub enum EventError {
	/// The envelope itself is not valid JSON of the expected shape.
	#[error("Event envelope is malformed.")]
	Envelope {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The `type` discriminator is not part of the family's event set.
	#[error("Unknown {family} event type: {event_type}.")]
	UnknownType {
		/// Family the writer handles.
		family: EventFamily,
		/// Received discriminator.
		event_type: String,
	},
	/// The payload does not match the schema of its event type.
	#[error("Payload of {event_type} is malformed.")]
	Payload {
		/// Event type discriminator.
		event_type: &'static str,
		/// Structured parsing failure, including the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}

/// Event as delivered by the event source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	/// Identifier of the per-entity stream.
	pub stream_id: String,
	/// Position of the event within its stream.
	pub version: u64,
	/// Event type discriminator.
	#[serde(rename = "type")]
	pub event_type: String,
	/// Entity-specific payload.
	#[serde(default)]
	pub data: Value,
}
impl EventEnvelope {
	/// Creates an envelope from its parts.
	pub fn new(
		stream_id: impl Into<String>,
		version: u64,
		event_type: impl Into<String>,
		data: Value,
	) -> Self {
		Self { stream_id: stream_id.into(), version, event_type: event_type.into(), data }
	}

	/// Parses a JSON-encoded envelope.
	pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
		let mut de = serde_json::Deserializer::from_slice(bytes);

		serde_path_to_error::deserialize(&mut de).map_err(|source| EventError::Envelope { source })
	}

	/// Decodes the envelope into a typed event of one family.
	pub fn decode<K, P>(&self) -> Result<DomainEvent<K, P>, EventError>
	where
		K: EventKind,
		P: DeserializeOwned,
	{
		let kind = K::parse(&self.event_type).ok_or_else(|| EventError::UnknownType {
			family: K::FAMILY,
			event_type: self.event_type.clone(),
		})?;
		let data = if self.data.is_null() { Value::Object(Map::new()) } else { self.data.clone() };
		let payload = serde_path_to_error::deserialize(data)
			.map_err(|source| EventError::Payload { event_type: kind.as_str(), source })?;

		Ok(DomainEvent { stream_id: self.stream_id.clone(), version: self.version, kind, payload })
	}
}

/// A decoded event of a single family.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainEvent<K, P> {
	/// Identifier of the per-entity stream.
	pub stream_id: String,
	/// Position of the event within its stream.
	pub version: u64,
	/// Event type.
	pub kind: K,
	/// Decoded payload.
	pub payload: P,
}
impl<K, P> DomainEvent<K, P>
where
	K: EventKind,
{
	/// Returns the embedded snapshot or a missing-data error naming the event and field.
	pub fn require<'a, T>(&self, snapshot: &'a Option<T>, field: &'static str) -> Result<&'a T> {
		snapshot.as_ref().ok_or(Error::MissingEventData { event_type: self.kind.as_str(), field })
	}
}
