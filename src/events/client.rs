//! Client and key events.

// crates.io
use jsonwebtoken::Algorithm;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, KeyId, PurposeId, TenantId},
	events::{DomainEvent, EventFamily, event_kinds},
	state::ClientKind,
};

/// Decoded client event.
pub type ClientEvent = DomainEvent<ClientEventKind, ClientPayload>;

event_kinds! {
	/// Every event type emitted on a client stream.
	ClientEventKind, EventFamily::Client, {
		/// A client was created.
		ClientAdded,
		/// A client was removed.
		ClientDeleted,
		/// A public key was registered.
		ClientKeyAdded,
		/// A public key was revoked.
		ClientKeyDeleted,
		/// The client was bound to a purpose.
		ClientPurposeAdded,
		/// The client was unbound from a purpose.
		ClientPurposeRemoved,
		/// A user was granted access to the client.
		ClientUserAdded,
		/// A user lost access to the client.
		ClientUserDeleted,
		/// An administrator was assigned to an API client.
		ClientAdminSet,
		/// The administrator of an API client was removed.
		ClientAdminRemoved,
	}
}

/// Registered public key embedded in a client snapshot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySnapshot {
	/// Key identifier.
	pub kid: KeyId,
	/// Base64-encoded PEM of the public key.
	pub encoded_pem: String,
	/// Algorithm the key signs with.
	#[serde(default = "default_algorithm")]
	pub algorithm: Algorithm,
}
impl Debug for KeySnapshot {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeySnapshot")
			.field("kid", &self.kid)
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}

/// Client snapshot embedded in client events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSnapshot {
	/// Client identifier.
	pub id: ClientId,
	/// Tenant owning the client.
	pub consumer_id: TenantId,
	/// Client kind.
	pub kind: ClientKind,
	/// Purposes the client is bound to.
	#[serde(default)]
	pub purposes: Vec<PurposeId>,
	/// Registered keys.
	#[serde(default)]
	pub keys: Vec<KeySnapshot>,
}
impl ClientSnapshot {
	/// Finds a registered key by id.
	pub fn key(&self, kid: &KeyId) -> Option<&KeySnapshot> {
		self.keys.iter().find(|key| &key.kid == kid)
	}
}

/// Payload of every client event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
	/// Key the event is about, for key events.
	pub kid: Option<KeyId>,
	/// Purpose the event is about, for purpose events.
	pub purpose_id: Option<PurposeId>,
	/// Client state after the event.
	pub client: Option<ClientSnapshot>,
}

fn default_algorithm() -> Algorithm {
	Algorithm::RS256
}
