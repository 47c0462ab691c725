mod common;

// crates.io
use serde_json::json;
// self
use common::*;
use platform_token_engine::{
	auth::{ClientId, DescriptorId, KeyId, PurposeId},
	error::Error,
	events::EventEnvelope,
	projection::{FanOutReport, ProjectionOutcome},
	state::{ItemState, PlatformStateKey, PurposeBinding, TokenGenStateKey},
	store::{PlatformStateStore, TokenGenStateStore},
};

fn scoped_key() -> TokenGenStateKey {
	TokenGenStateKey::client_kid_purpose(
		ClientId::new(CLIENT).expect("Fixture is valid."),
		KeyId::new(KID).expect("Fixture is valid."),
		PurposeId::new(PURPOSE).expect("Fixture is valid."),
	)
}

async fn binding(engine: &Engine) -> PurposeBinding {
	TokenGenStateStore::get(engine.store.as_ref(), &scoped_key())
		.await
		.expect("Read should succeed.")
		.expect("Scoped key should exist.")
		.binding
		.expect("Scoped key should carry a purpose binding.")
}

fn history() -> Vec<EventEnvelope> {
	vec![
		descriptor(1, "EServiceDescriptorPublished", "Published"),
		agreement(1, "AgreementActivated", "Active"),
		purpose(1, "PurposeActivated", "Active"),
		client(1, "ClientAdded", "CONSUMER", &[PURPOSE], json!({})),
		agreement(2, "AgreementSuspendedByConsumer", "Suspended"),
		agreement(3, "AgreementUnsuspendedByConsumer", "Active"),
	]
}

#[tokio::test]
async fn descriptor_published_last_completes_a_waiting_key() {
	let engine = Engine::new();

	engine.apply(&client(1, "ClientAdded", "CONSUMER", &[PURPOSE], json!({}))).await;
	engine.apply(&purpose(1, "PurposeActivated", "Active")).await;
	engine.apply(&agreement(1, "AgreementActivated", "Active")).await;

	let waiting = binding(&engine).await;

	assert!(waiting.descriptor.is_none());
	assert!(matches!(
		engine.issuer.issue(&token_request(Some(PURPOSE))).await,
		Err(Error::PlatformStateInvalid)
	));

	let outcome = engine.apply(&descriptor(1, "EServiceDescriptorPublished", "Published")).await;

	assert!(
		matches!(outcome, ProjectionOutcome::Applied(report) if report.updated == 1),
		"Descriptor publication should reach the waiting key: {outcome:?}."
	);

	let key =
		PlatformStateKey::Descriptor(DescriptorId::new(DESCRIPTOR).expect("Fixture is valid."));
	let stored = PlatformStateStore::get(engine.store.as_ref(), &key)
		.await
		.expect("Read should succeed.")
		.expect("Descriptor entry should exist.");

	assert_eq!(stored.state, ItemState::Active);
	assert_eq!(stored.version, 1);

	let issued = engine
		.issuer
		.issue(&token_request(Some(PURPOSE)))
		.await
		.expect("The key should be entitled once every linked entity is active.");

	assert_eq!(issued.token.claims.aud, vec![ESERVICE_AUDIENCE.to_owned()]);
}

#[tokio::test]
async fn descriptor_changes_reach_every_key_of_the_purpose() {
	let engine = Engine::new();
	let kids = ["kid-1", "kid-2", "kid-3"];

	engine.apply(&descriptor(1, "EServiceDescriptorPublished", "Published")).await;
	engine.apply(&agreement(1, "AgreementActivated", "Active")).await;
	engine.apply(&purpose(1, "PurposeActivated", "Active")).await;
	engine
		.apply(&client_with_keys(1, "ClientAdded", "CONSUMER", &[PURPOSE], &kids, json!({})))
		.await;

	assert_eq!(engine.store.token_gen_len(), kids.len());

	let outcome = engine.apply(&descriptor(2, "EServiceDescriptorSuspended", "Suspended")).await;

	assert_eq!(
		outcome,
		ProjectionOutcome::Applied(FanOutReport {
			matched: kids.len(),
			updated: kids.len(),
			unchanged: 0,
			conflicted: 0,
		})
	);

	for kid in kids {
		let key = TokenGenStateKey::client_kid_purpose(
			ClientId::new(CLIENT).expect("Fixture is valid."),
			KeyId::new(kid).expect("Fixture is valid."),
			PurposeId::new(PURPOSE).expect("Fixture is valid."),
		);
		let block = TokenGenStateStore::get(engine.store.as_ref(), &key)
			.await
			.expect("Read should succeed.")
			.and_then(|entry| entry.binding)
			.and_then(|binding| binding.descriptor)
			.unwrap_or_else(|| panic!("{key} should carry a descriptor block."));

		assert!(key.render().starts_with("CLIENTKIDPURPOSE#"));
		assert_eq!(block.version, 2);
		assert_eq!(block.value.state, ItemState::Inactive);
	}
}

#[tokio::test]
async fn delivery_order_does_not_change_the_projection() {
	let forward = Engine::new();
	let reversed = Engine::new();
	let events = history();

	for event in &events {
		forward.apply(event).await;
	}
	for event in events.iter().rev() {
		reversed.apply(event).await;
	}

	assert_eq!(binding(&forward).await, binding(&reversed).await);
	assert_eq!(forward.store.platform_len(), reversed.store.platform_len());
	assert_eq!(forward.store.token_gen_len(), reversed.store.token_gen_len());

	// Agreement version 1 arrives after version 3 and must not win.
	reversed
		.issuer
		.issue(&token_request(Some(PURPOSE)))
		.await
		.expect("The newest agreement version is active.");
}

#[tokio::test]
async fn replaying_the_stream_is_idempotent() {
	let engine = Engine::new();
	let events = history();

	for event in &events {
		engine.apply(event).await;
	}

	let before = binding(&engine).await;

	for event in &events {
		assert_eq!(engine.apply(event).await, ProjectionOutcome::Discarded);
	}

	assert_eq!(binding(&engine).await, before);
	assert_eq!(engine.store.platform_len(), 3);
	assert_eq!(engine.store.token_gen_len(), 1);
}

#[tokio::test]
async fn late_events_never_overwrite_newer_state() {
	let engine = Engine::new();

	engine.seed_active_consumer().await;
	engine.apply(&purpose(3, "PurposeVersionSuspendedByProducer", "Suspended")).await;

	assert_eq!(
		engine.apply(&purpose(2, "PurposeVersionUnsuspendedByProducer", "Active")).await,
		ProjectionOutcome::Discarded
	);

	let purpose_block = binding(&engine).await.purpose.expect("Purpose block should exist.");

	assert_eq!(purpose_block.version, 3);
	assert_eq!(purpose_block.value.state, ItemState::Inactive);
	assert!(engine.issuer.issue(&token_request(Some(PURPOSE))).await.is_err());
}

#[tokio::test]
async fn agreement_upgrades_move_keys_to_the_new_descriptor() {
	let engine = Engine::new();

	engine.seed_active_consumer().await;
	engine
		.apply(&descriptor_with(
			2,
			"EServiceDescriptorPublished",
			NEXT_DESCRIPTOR,
			&[(DESCRIPTOR, "Deprecated"), (NEXT_DESCRIPTOR, "Published")],
		))
		.await;
	engine.apply(&agreement_on(2, "AgreementUpgraded", "Active", NEXT_DESCRIPTOR)).await;

	let upgraded = binding(&engine).await;
	let agreement = upgraded.agreement.expect("Agreement block should exist.");
	let descriptor = upgraded.descriptor.expect("Descriptor block should follow the agreement.");

	assert_eq!(agreement.value.descriptor_id.to_string(), NEXT_DESCRIPTOR);
	assert_eq!(descriptor.value.descriptor_id.to_string(), NEXT_DESCRIPTOR);

	engine
		.issuer
		.issue(&token_request(Some(PURPOSE)))
		.await
		.expect("Upgraded keys should stay entitled.");
}

#[tokio::test]
async fn archival_deletes_platform_entries_and_blocks_issuance() {
	let engine = Engine::new();

	engine.seed_active_consumer().await;
	engine.apply(&purpose(2, "PurposeArchived", "Archived")).await;

	assert_eq!(engine.store.platform_len(), 2);
	assert!(matches!(
		engine.issuer.issue(&token_request(Some(PURPOSE))).await,
		Err(Error::PlatformStateInvalid)
	));

	engine
		.apply(&client(2, "ClientPurposeRemoved", "CONSUMER", &[], json!({ "purposeId": PURPOSE })))
		.await;

	assert!(
		TokenGenStateStore::get(engine.store.as_ref(), &scoped_key())
			.await
			.expect("Read should succeed.")
			.is_none()
	);
}
