//! Platform-state entries: one per agreement, descriptor, and purpose.

// self
use crate::{
	_prelude::*,
	auth::{AgreementId, DescriptorId, EServiceId, PurposeId, PurposeVersionId, TenantId},
	state::{ItemState, KeyParseError},
};

const AGREEMENT_PREFIX: &str = "AGREEMENT";
const DESCRIPTOR_PREFIX: &str = "DESC";
const PURPOSE_PREFIX: &str = "PURPOSE";

/// Composite primary key of a platform-state entry.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlatformStateKey {
	/// Agreement entry.
	Agreement(AgreementId),
	/// Descriptor entry.
	Descriptor(DescriptorId),
	/// Purpose entry.
	Purpose(PurposeId),
}
impl PlatformStateKey {
	/// Renders the key as a single `KIND#id` string.
	pub fn render(&self) -> String {
		self.to_string()
	}
}
impl Display for PlatformStateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Agreement(id) => write!(f, "{AGREEMENT_PREFIX}#{id}"),
			Self::Descriptor(id) => write!(f, "{DESCRIPTOR_PREFIX}#{id}"),
			Self::Purpose(id) => write!(f, "{PURPOSE_PREFIX}#{id}"),
		}
	}
}
impl Debug for PlatformStateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "PlatformStateKey({self})")
	}
}
impl FromStr for PlatformStateKey {
	type Err = KeyParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || KeyParseError::new(s);
		let (prefix, id) = s.split_once('#').ok_or_else(err)?;

		match prefix {
			AGREEMENT_PREFIX => AgreementId::new(id).map(Self::Agreement).map_err(|_| err()),
			DESCRIPTOR_PREFIX => DescriptorId::new(id).map(Self::Descriptor).map_err(|_| err()),
			PURPOSE_PREFIX => PurposeId::new(id).map(Self::Purpose).map_err(|_| err()),
			_ => Err(err()),
		}
	}
}
impl TryFrom<String> for PlatformStateKey {
	type Error = KeyParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl From<PlatformStateKey> for String {
	fn from(value: PlatformStateKey) -> Self {
		value.to_string()
	}
}

/// Entity-specific attributes copied into platform state for token issuance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlatformStateData {
	/// Agreement between a consumer and an e-service.
	#[serde(rename_all = "camelCase")]
	Agreement {
		/// Consumer tenant.
		consumer_id: TenantId,
		/// E-service the agreement grants access to.
		eservice_id: EServiceId,
		/// Descriptor the agreement is bound to.
		descriptor_id: DescriptorId,
	},
	/// Published descriptor of an e-service.
	#[serde(rename_all = "camelCase")]
	Descriptor {
		/// Owning e-service.
		eservice_id: EServiceId,
		/// Audiences minted into consumer tokens.
		audience: Vec<String>,
		/// Lifetime of consumer tokens, in seconds.
		voucher_lifespan: u32,
	},
	/// Consumer purpose.
	#[serde(rename_all = "camelCase")]
	Purpose {
		/// E-service the purpose targets.
		eservice_id: EServiceId,
		/// Consumer tenant.
		consumer_id: TenantId,
		/// Most recently activated or suspended version.
		version_id: PurposeVersionId,
	},
}

/// Current authorization state of a single upstream entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStateEntry {
	/// Primary key.
	pub key: PlatformStateKey,
	/// Derived authorization state.
	pub state: ItemState,
	/// Last applied event-stream version.
	pub version: u64,
	/// Instant of the last applied write.
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	/// Entity-specific attributes.
	pub data: PlatformStateData,
}
impl PlatformStateEntry {
	/// Secondary `consumerId#eserviceId` lookup value of agreement entries.
	pub fn consumer_eservice(&self) -> Option<String> {
		match &self.data {
			PlatformStateData::Agreement { consumer_id, eservice_id, .. } =>
				Some(format!("{consumer_id}#{eservice_id}")),
			_ => None,
		}
	}

	/// Returns `true` if the entry is an agreement between the consumer and the e-service.
	pub fn is_agreement_for(&self, consumer: &TenantId, eservice: &EServiceId) -> bool {
		matches!(
			&self.data,
			PlatformStateData::Agreement { consumer_id, eservice_id, .. }
				if consumer_id == consumer && eservice_id == eservice
		)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const ID: &str = "6a7b8c9d-0e1f-4a2b-8c3d-4e5f6a7b8c9d";

	#[test]
	fn keys_render_and_parse() {
		let key = PlatformStateKey::Descriptor(DescriptorId::new(ID).expect("Fixture is valid."));

		assert_eq!(key.render(), format!("DESC#{ID}"));
		assert_eq!(key.render().parse::<PlatformStateKey>(), Ok(key));
		assert!("AGREEMENT#nope".parse::<PlatformStateKey>().is_err());
		assert!(format!("PURPOSES#{ID}").parse::<PlatformStateKey>().is_err());
	}

	#[test]
	fn entries_serialize_with_tagged_data() {
		let entry = PlatformStateEntry {
			key: PlatformStateKey::Agreement(AgreementId::new(ID).expect("Fixture is valid.")),
			state: ItemState::Active,
			version: 3,
			updated_at: time::macros::datetime!(2025-01-01 00:00 UTC),
			data: PlatformStateData::Agreement {
				consumer_id: TenantId::new(ID).expect("Fixture is valid."),
				eservice_id: EServiceId::new(ID).expect("Fixture is valid."),
				descriptor_id: DescriptorId::new(ID).expect("Fixture is valid."),
			},
		};
		let json = serde_json::to_value(&entry).expect("Entry should serialize.");

		assert_eq!(json["key"], format!("AGREEMENT#{ID}"));
		assert_eq!(json["state"], "ACTIVE");
		assert_eq!(json["data"]["kind"], "agreement");
		assert_eq!(entry.consumer_eservice(), Some(format!("{ID}#{ID}")));

		let back: PlatformStateEntry = serde_json::from_value(json).expect("Entry should parse.");

		assert_eq!(back, entry);
	}
}
