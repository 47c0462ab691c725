//! Entitlement check over the platform state copied onto a token-generation entry.

// self
use crate::{
	_prelude::*,
	auth::{PurposeId, TenantId},
	state::{ClientKind, TokenGenStateEntry},
};

/// A reason a consumer key is not entitled to a token; logged, never returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum EntitlementError {
	/// The consumer key is not bound to a purpose.
	#[error("Key is not bound to a purpose.")]
	MissingBinding,
	/// The assertion carries no `purposeId` claim.
	#[error("Assertion does not declare a purpose.")]
	MissingPurposeClaim,
	/// The declared purpose differs from the bound one.
	#[error("Declared purpose does not match the key binding.")]
	PurposeMismatch,
	/// The bound purpose has not been back-filled yet.
	#[error("Purpose state is unknown.")]
	PurposeUnknown,
	/// The bound purpose is inactive.
	#[error("Purpose is not active.")]
	PurposeInactive,
	/// No agreement has been back-filled yet.
	#[error("Agreement state is unknown.")]
	AgreementUnknown,
	/// The bound agreement is inactive.
	#[error("Agreement is not active.")]
	AgreementInactive,
	/// No descriptor has been back-filled yet.
	#[error("Descriptor state is unknown.")]
	DescriptorUnknown,
	/// The bound descriptor is inactive.
	#[error("Descriptor is not active.")]
	DescriptorInactive,
}

/// What a token may be minted for once the entitlement check passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entitlement {
	/// API-kind key: fixed audience and lifetime from configuration.
	Api,
	/// Consumer key with fully active platform state.
	Consumer {
		/// Purpose the token is minted for.
		purpose_id: PurposeId,
		/// Tenant owning the client.
		consumer_id: TenantId,
		/// Descriptor audience.
		audience: Vec<String>,
		/// Descriptor voucher lifespan, in seconds.
		voucher_lifespan: u32,
	},
}

/// Checks the denormalized platform state of `entry` for the declared purpose.
///
/// API-kind entries pass unconditionally. Every independent failure of a consumer entry is
/// collected.
pub fn check_entitlement(
	entry: &TokenGenStateEntry,
	purpose_claim: Option<&PurposeId>,
) -> Result<Entitlement, Vec<EntitlementError>> {
	if entry.client_kind == ClientKind::Api {
		return Ok(Entitlement::Api);
	}

	let mut errors = Vec::new();
	let Some(binding) = &entry.binding else {
		errors.push(EntitlementError::MissingBinding);

		if purpose_claim.is_none() {
			errors.push(EntitlementError::MissingPurposeClaim);
		}

		return Err(errors);
	};

	match purpose_claim {
		None => errors.push(EntitlementError::MissingPurposeClaim),
		Some(claim) if claim != &binding.purpose_id =>
			errors.push(EntitlementError::PurposeMismatch),
		Some(_) => {},
	}

	match &binding.purpose {
		None => errors.push(EntitlementError::PurposeUnknown),
		Some(purpose) if !purpose.value.state.is_active() =>
			errors.push(EntitlementError::PurposeInactive),
		Some(_) => {},
	}
	match &binding.agreement {
		None => errors.push(EntitlementError::AgreementUnknown),
		Some(agreement) if !agreement.value.state.is_active() =>
			errors.push(EntitlementError::AgreementInactive),
		Some(_) => {},
	}

	let descriptor = match &binding.descriptor {
		None => {
			errors.push(EntitlementError::DescriptorUnknown);

			None
		},
		Some(descriptor) if !descriptor.value.state.is_active() => {
			errors.push(EntitlementError::DescriptorInactive);

			None
		},
		Some(descriptor) => Some(&descriptor.value),
	};

	match descriptor {
		Some(descriptor) if errors.is_empty() => Ok(Entitlement::Consumer {
			purpose_id: binding.purpose_id.clone(),
			consumer_id: entry.consumer_id.clone(),
			audience: descriptor.audience.clone(),
			voucher_lifespan: descriptor.voucher_lifespan,
		}),
		_ => Err(errors),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::Algorithm;
	// self
	use super::*;
	use crate::{
		auth::{AgreementId, ClientId, DescriptorId, KeyId, PurposeVersionId},
		state::{
			AgreementLink, DescriptorLink, ItemState, Linked, PurposeBinding, PurposeLink,
			TokenGenStateKey,
		},
	};

	const ID: &str = "44444444-4444-4444-8444-444444444444";
	const OTHER: &str = "55555555-5555-4555-8555-555555555555";

	fn purpose() -> PurposeId {
		PurposeId::new(ID).expect("Fixture is valid.")
	}

	fn entry(kind: ClientKind, state: ItemState) -> TokenGenStateEntry {
		let mut binding = PurposeBinding::new(purpose());

		binding.purpose = Some(Linked::new(
			PurposeLink {
				version_id: PurposeVersionId::new(ID).expect("Fixture is valid."),
				state,
			},
			1,
		));
		binding.agreement = Some(Linked::new(
			AgreementLink {
				agreement_id: AgreementId::new(ID).expect("Fixture is valid."),
				descriptor_id: DescriptorId::new(ID).expect("Fixture is valid."),
				state: ItemState::Active,
			},
			1,
		));
		binding.descriptor = Some(Linked::new(
			DescriptorLink {
				descriptor_id: DescriptorId::new(ID).expect("Fixture is valid."),
				state: ItemState::Active,
				audience: vec!["aud.example".into()],
				voucher_lifespan: 300,
			},
			1,
		));

		TokenGenStateEntry {
			key: TokenGenStateKey::client_kid(
				ClientId::new(ID).expect("Fixture is valid."),
				KeyId::new("kid").expect("Fixture is valid."),
			),
			revision: 1,
			client_version: 1,
			consumer_id: TenantId::new(ID).expect("Fixture is valid."),
			client_kind: kind,
			public_key: String::new(),
			algorithm: Algorithm::RS256,
			binding: (kind == ClientKind::Consumer).then_some(binding),
			updated_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	#[test]
	fn api_keys_skip_the_check() {
		assert_eq!(
			check_entitlement(&entry(ClientKind::Api, ItemState::Inactive), None),
			Ok(Entitlement::Api)
		);
	}

	#[test]
	fn active_consumer_keys_yield_descriptor_audience() {
		let entitlement =
			check_entitlement(&entry(ClientKind::Consumer, ItemState::Active), Some(&purpose()))
				.expect("Fully active state should be entitled.");

		match entitlement {
			Entitlement::Consumer { audience, voucher_lifespan, .. } => {
				assert_eq!(audience, vec!["aud.example".to_owned()]);
				assert_eq!(voucher_lifespan, 300);
			},
			Entitlement::Api => panic!("Consumer key should not be treated as API."),
		}
	}

	#[test]
	fn consumer_failures_are_collected() {
		let errors = check_entitlement(&entry(ClientKind::Consumer, ItemState::Inactive), None)
			.expect_err("Inactive purpose without a claim should be rejected.");

		assert_eq!(
			errors,
			vec![EntitlementError::MissingPurposeClaim, EntitlementError::PurposeInactive]
		);

		let other = PurposeId::new(OTHER).expect("Fixture is valid.");
		let errors =
			check_entitlement(&entry(ClientKind::Consumer, ItemState::Active), Some(&other))
				.expect_err("Purpose mismatch should be rejected.");

		assert_eq!(errors, vec![EntitlementError::PurposeMismatch]);

		let mut unbound = entry(ClientKind::Consumer, ItemState::Active);

		unbound.binding = None;

		assert_eq!(
			check_entitlement(&unbound, Some(&purpose())),
			Err(vec![EntitlementError::MissingBinding])
		);
	}
}
