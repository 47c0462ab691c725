//! Token-generation entries: client signing keys plus the platform state they depend on.
//!
//! Key material is written once by the client writer and only replaced on key rotation. The
//! [`PurposeBinding`] blocks are patched in place by the agreement, catalog, and purpose writers;
//! each block remembers the platform-state version it was copied from so stale patches are
//! discarded independently of the entry's storage revision.

// crates.io
use jsonwebtoken::Algorithm;
// self
use crate::{
	_prelude::*,
	auth::{
		AgreementId, ClientId, DescriptorId, EServiceId, KeyId, PurposeId, PurposeVersionId,
		TenantId,
	},
	state::{ItemState, KeyParseError},
};

const CLIENT_KID_PREFIX: &str = "CLIENTKID";
const CLIENT_KID_PURPOSE_PREFIX: &str = "CLIENTKIDPURPOSE";

/// Kind of OAuth client owning a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientKind {
	/// Calls platform APIs; carries no agreement/descriptor/purpose state.
	Api,
	/// Calls producer e-services on behalf of a purpose.
	Consumer,
}

/// Composite primary key of a token-generation entry.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenGenStateKey {
	/// Owning client.
	pub client_id: ClientId,
	/// Signing key identifier.
	pub kid: KeyId,
	/// Purpose the key is bound to, for consumer clients with purposes.
	pub purpose_id: Option<PurposeId>,
}
impl TokenGenStateKey {
	/// Key of an entry not scoped to a purpose.
	pub fn client_kid(client_id: ClientId, kid: KeyId) -> Self {
		Self { client_id, kid, purpose_id: None }
	}

	/// Key of an entry scoped to a purpose.
	pub fn client_kid_purpose(client_id: ClientId, kid: KeyId, purpose_id: PurposeId) -> Self {
		Self { client_id, kid, purpose_id: Some(purpose_id) }
	}

	/// Renders the key as a single `#`-separated string.
	pub fn render(&self) -> String {
		self.to_string()
	}
}
impl Display for TokenGenStateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match &self.purpose_id {
			Some(purpose_id) => write!(
				f,
				"{CLIENT_KID_PURPOSE_PREFIX}#{}#{}#{purpose_id}",
				self.client_id, self.kid
			),
			None => write!(f, "{CLIENT_KID_PREFIX}#{}#{}", self.client_id, self.kid),
		}
	}
}
impl Debug for TokenGenStateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenGenStateKey({self})")
	}
}
impl FromStr for TokenGenStateKey {
	type Err = KeyParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || KeyParseError::new(s);
		let parts = s.split('#').collect::<Vec<_>>();

		match parts.as_slice() {
			[CLIENT_KID_PREFIX, client, kid] => Ok(Self::client_kid(
				ClientId::new(client).map_err(|_| err())?,
				KeyId::new(kid).map_err(|_| err())?,
			)),
			[CLIENT_KID_PURPOSE_PREFIX, client, kid, purpose] => Ok(Self::client_kid_purpose(
				ClientId::new(client).map_err(|_| err())?,
				KeyId::new(kid).map_err(|_| err())?,
				PurposeId::new(purpose).map_err(|_| err())?,
			)),
			_ => Err(err()),
		}
	}
}
impl TryFrom<String> for TokenGenStateKey {
	type Error = KeyParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl From<TokenGenStateKey> for String {
	fn from(value: TokenGenStateKey) -> Self {
		value.to_string()
	}
}

/// Secondary lookup keys used by the writers to fan out updates.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupKey {
	/// `consumerId#eserviceId`, driven by agreement changes.
	ConsumerEService(TenantId, EServiceId),
	/// `eserviceId#descriptorId`, driven by descriptor changes.
	EServiceDescriptor(EServiceId, DescriptorId),
	/// `clientId#purposeId`, driven by client purpose changes.
	ClientPurpose(ClientId, PurposeId),
	/// `purposeId`, driven by purpose changes.
	Purpose(PurposeId),
	/// `clientId`, driven by client deletion.
	Client(ClientId),
	/// `clientId#kid`, driven by key deletion.
	ClientKid(ClientId, KeyId),
}
impl Display for LookupKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::ConsumerEService(consumer, eservice) => write!(f, "{consumer}#{eservice}"),
			Self::EServiceDescriptor(eservice, descriptor) => write!(f, "{eservice}#{descriptor}"),
			Self::ClientPurpose(client, purpose) => write!(f, "{client}#{purpose}"),
			Self::Purpose(purpose) => write!(f, "{purpose}"),
			Self::Client(client) => write!(f, "{client}"),
			Self::ClientKid(client, kid) => write!(f, "{client}#{kid}"),
		}
	}
}
impl Debug for LookupKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "LookupKey({self})")
	}
}

/// A denormalized value together with the platform-state version it was copied from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linked<T> {
	/// Copied value.
	pub value: T,
	/// Platform-state version of the source entry.
	pub version: u64,
}
impl<T> Linked<T> {
	/// Wraps a value copied at the given version.
	pub fn new(value: T, version: u64) -> Self {
		Self { value, version }
	}
}

/// Agreement state copied onto a consumer key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementLink {
	/// Agreement identifier.
	pub agreement_id: AgreementId,
	/// Descriptor the agreement is bound to.
	pub descriptor_id: DescriptorId,
	/// Agreement state.
	pub state: ItemState,
}

/// Descriptor state copied onto a consumer key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorLink {
	/// Descriptor identifier.
	pub descriptor_id: DescriptorId,
	/// Descriptor state.
	pub state: ItemState,
	/// Audiences minted into tokens.
	pub audience: Vec<String>,
	/// Token lifetime in seconds.
	pub voucher_lifespan: u32,
}

/// Purpose state copied onto a consumer key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeLink {
	/// Most recently activated or suspended version.
	pub version_id: PurposeVersionId,
	/// Purpose state.
	pub state: ItemState,
}

/// Platform state a consumer key depends on; blocks stay `None` until back-filled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeBinding {
	/// Purpose the key is bound to.
	pub purpose_id: PurposeId,
	/// E-service targeted by the purpose, once known.
	pub eservice_id: Option<EServiceId>,
	/// Copied purpose state.
	pub purpose: Option<Linked<PurposeLink>>,
	/// Copied agreement state.
	pub agreement: Option<Linked<AgreementLink>>,
	/// Copied descriptor state.
	pub descriptor: Option<Linked<DescriptorLink>>,
}
impl PurposeBinding {
	/// Creates an empty binding for the purpose.
	pub fn new(purpose_id: PurposeId) -> Self {
		Self { purpose_id, eservice_id: None, purpose: None, agreement: None, descriptor: None }
	}
}

/// A client signing key and the state needed to authorize tokens signed with it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGenStateEntry {
	/// Primary key.
	pub key: TokenGenStateKey,
	/// Storage revision, incremented on every write; used for compare-and-swap.
	pub revision: u64,
	/// Client event-stream version that last wrote the key material.
	pub client_version: u64,
	/// Tenant owning the client.
	pub consumer_id: TenantId,
	/// Client kind.
	pub client_kind: ClientKind,
	/// Base64-encoded PEM of the public key.
	pub public_key: String,
	/// Algorithm the key signs with.
	pub algorithm: Algorithm,
	/// Purpose-bound platform state (consumer clients only).
	pub binding: Option<PurposeBinding>,
	/// Instant of the last write.
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}
impl TokenGenStateEntry {
	/// Secondary lookup keys the entry can be found by.
	pub fn lookup_keys(&self) -> Vec<LookupKey> {
		let client = &self.key.client_id;
		let mut keys = vec![
			LookupKey::Client(client.clone()),
			LookupKey::ClientKid(client.clone(), self.key.kid.clone()),
		];

		if let Some(binding) = &self.binding {
			keys.push(LookupKey::Purpose(binding.purpose_id.clone()));
			keys.push(LookupKey::ClientPurpose(client.clone(), binding.purpose_id.clone()));

			if let Some(eservice) = &binding.eservice_id {
				keys.push(LookupKey::ConsumerEService(self.consumer_id.clone(), eservice.clone()));

				if let Some(agreement) = &binding.agreement {
					keys.push(LookupKey::EServiceDescriptor(
						eservice.clone(),
						agreement.value.descriptor_id.clone(),
					));
				}
			}
		}

		keys
	}

	/// Returns `true` if the entry is reachable through the lookup key.
	pub fn matches(&self, lookup: &LookupKey) -> bool {
		self.lookup_keys().iter().any(|key| key == lookup)
	}
}
impl Debug for TokenGenStateEntry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGenStateEntry")
			.field("key", &self.key)
			.field("revision", &self.revision)
			.field("client_version", &self.client_version)
			.field("consumer_id", &self.consumer_id)
			.field("client_kind", &self.client_kind)
			.field("algorithm", &self.algorithm)
			.field("binding", &self.binding)
			.field("updated_at", &self.updated_at)
			.finish_non_exhaustive()
	}
}
