//! Fixtures shared by the integration tests: identifiers, keys, event builders, and a wired engine.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use time::OffsetDateTime;
// self
use platform_token_engine::{
	auth::{KeyId, PemTokenSigner},
	config::{IssuerConfig, RetryPolicy},
	events::EventEnvelope,
	issuance::{AuditSink, MemoryAuditSink, TokenIssuer, TokenRequest},
	projection::{
		AgreementWriter, CatalogWriter, ClientWriter, ProjectionOutcome, ProjectionWriter,
		PurposeWriter, WriterContext,
	},
	store::{MemoryStore, StoreClient},
};

pub const CLIENT: &str = "5c1d2c3e-7f3a-4c8e-9a61-0b9b8f6f2a10";
pub const TENANT: &str = "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d";
pub const PRODUCER: &str = "6f7a8b9c-0d1e-4f2a-9b4c-5d6e7f8a9b0c";
pub const ESERVICE: &str = "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e";
pub const DESCRIPTOR: &str = "3c4d5e6f-7a8b-4c9d-8e1f-2a3b4c5d6e7f";
pub const NEXT_DESCRIPTOR: &str = "7a8b9c0d-1e2f-4a3b-8c5d-6e7f8a9b0c1d";
pub const AGREEMENT: &str = "4d5e6f7a-8b9c-4d0e-9f2a-3b4c5d6e7f8a";
pub const PURPOSE: &str = "0f5a3c7e-1d2b-4e6f-8a9b-3c4d5e6f7a8b";
pub const PURPOSE_VERSION: &str = "5e6f7a8b-9c0d-4e1f-8a3b-4c5d6e7f8a9b";
pub const KID: &str = "kid-1";
pub const ASSERTION_AUDIENCE: &str = "auth.example/client-assertion";
pub const ISSUER: &str = "auth.example";
pub const API_AUDIENCE: &str = "api.example";
pub const ESERVICE_AUDIENCE: &str = "eservice.example";
pub const VOUCHER_LIFESPAN: u32 = 600;

pub const CLIENT_PRIVATE: &str = include_str!("../fixtures/client_private.pem");
pub const CLIENT_PUBLIC: &str = include_str!("../fixtures/client_public.pem");
pub const ISSUER_PRIVATE: &str = include_str!("../fixtures/issuer_private.pem");
pub const ISSUER_PUBLIC: &str = include_str!("../fixtures/issuer_public.pem");
pub const ROGUE_PRIVATE: &str = include_str!("../fixtures/rogue_private.pem");

pub fn config() -> IssuerConfig {
	IssuerConfig::builder()
		.issuer(ISSUER)
		.audience(ASSERTION_AUDIENCE)
		.api_audience(API_AUDIENCE)
		.api_token_lifespan(3_600)
		.signing_kid(KeyId::new("issuer-kid").expect("Fixture is valid."))
		.retry(RetryPolicy::immediate(5))
		.build()
		.expect("Fixture configuration should validate.")
}

/// Signs a client assertion for [`CLIENT`] with `private_pem`.
pub fn assertion(private_pem: &str, purpose_id: Option<&str>) -> String {
	let now = OffsetDateTime::now_utc().unix_timestamp();
	let mut header = Header::new(Algorithm::RS256);

	header.kid = Some(KID.into());

	let mut claims = json!({
		"iss": CLIENT,
		"sub": CLIENT,
		"aud": [ASSERTION_AUDIENCE],
		"jti": uuid::Uuid::new_v4().to_string(),
		"iat": now,
		"exp": now + 60,
	});

	if let (Some(purpose_id), Some(object)) = (purpose_id, claims.as_object_mut()) {
		object.insert("purposeId".into(), Value::from(purpose_id));
	}

	let key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
		.expect("Fixture private key should load.");

	jsonwebtoken::encode(&header, &claims, &key).expect("Fixture assertion should sign.")
}

pub fn token_request(purpose_id: Option<&str>) -> TokenRequest {
	TokenRequest::new(assertion(CLIENT_PRIVATE, purpose_id)).with_client_id(CLIENT)
}

pub fn descriptor(version: u64, event_type: &str, state: &str) -> EventEnvelope {
	descriptor_with(version, event_type, DESCRIPTOR, &[(DESCRIPTOR, state)])
}

/// Catalog event about `descriptor_id` carrying every descriptor in `descriptors`.
pub fn descriptor_with(
	version: u64,
	event_type: &str,
	descriptor_id: &str,
	descriptors: &[(&str, &str)],
) -> EventEnvelope {
	let descriptors = descriptors
		.iter()
		.map(|(id, state)| {
			json!({
				"id": id,
				"state": state,
				"audience": [ESERVICE_AUDIENCE],
				"voucherLifespan": VOUCHER_LIFESPAN
			})
		})
		.collect::<Vec<_>>();

	EventEnvelope::new(
		ESERVICE,
		version,
		event_type,
		json!({
			"descriptorId": descriptor_id,
			"eservice": { "id": ESERVICE, "producerId": PRODUCER, "descriptors": descriptors }
		}),
	)
}

pub fn agreement(version: u64, event_type: &str, state: &str) -> EventEnvelope {
	agreement_on(version, event_type, state, DESCRIPTOR)
}

pub fn agreement_on(
	version: u64,
	event_type: &str,
	state: &str,
	descriptor_id: &str,
) -> EventEnvelope {
	EventEnvelope::new(
		AGREEMENT,
		version,
		event_type,
		json!({
			"agreement": {
				"id": AGREEMENT,
				"eserviceId": ESERVICE,
				"descriptorId": descriptor_id,
				"consumerId": TENANT,
				"producerId": PRODUCER,
				"state": state
			}
		}),
	)
}

pub fn purpose(version: u64, event_type: &str, state: &str) -> EventEnvelope {
	EventEnvelope::new(
		PURPOSE,
		version,
		event_type,
		json!({
			"purpose": {
				"id": PURPOSE,
				"eserviceId": ESERVICE,
				"consumerId": TENANT,
				"versions": [{
					"id": PURPOSE_VERSION,
					"state": state,
					"createdAt": "2025-01-01T00:00:00Z"
				}]
			}
		}),
	)
}

/// Client event for [`CLIENT`] with the fixture key registered.
pub fn client(
	version: u64,
	event_type: &str,
	kind: &str,
	purposes: &[&str],
	extra: Value,
) -> EventEnvelope {
	client_with_keys(version, event_type, kind, purposes, &[KID], extra)
}

/// Client event for [`CLIENT`] registering the fixture public key under every kid in `kids`.
pub fn client_with_keys(
	version: u64,
	event_type: &str,
	kind: &str,
	purposes: &[&str],
	kids: &[&str],
	extra: Value,
) -> EventEnvelope {
	let keys = kids
		.iter()
		.map(|kid| json!({ "kid": kid, "encodedPem": STANDARD.encode(CLIENT_PUBLIC) }))
		.collect::<Vec<_>>();
	let mut data = json!({
		"client": {
			"id": CLIENT,
			"consumerId": TENANT,
			"kind": kind,
			"purposes": purposes,
			"keys": keys
		}
	});

	if let (Some(data), Value::Object(extra)) = (data.as_object_mut(), extra) {
		data.extend(extra);
	}

	EventEnvelope::new(CLIENT, version, event_type, data)
}

/// Every writer and the issuer wired to one in-memory store.
pub struct Engine {
	pub store: Arc<MemoryStore>,
	pub stores: StoreClient,
	pub catalog: CatalogWriter,
	pub agreement: AgreementWriter,
	pub purpose: PurposeWriter,
	pub client: ClientWriter,
	pub audit: Arc<MemoryAuditSink>,
	pub issuer: Arc<TokenIssuer>,
}
impl Engine {
	pub fn new() -> Self {
		Self::with_audit(Arc::new(MemoryAuditSink::default()))
	}

	pub fn with_audit(audit: Arc<MemoryAuditSink>) -> Self {
		Self::with_sink(audit.clone(), audit)
	}

	pub fn with_sink(audit: Arc<MemoryAuditSink>, sink: Arc<dyn AuditSink>) -> Self {
		let store = Arc::new(MemoryStore::default());
		let stores = StoreClient::new(store.clone(), store.clone());
		let config = config();
		let ctx = WriterContext::new(stores.clone(), config.retry);
		let signer =
			PemTokenSigner::from_rsa_pem(config.signing_kid.clone(), ISSUER_PRIVATE.as_bytes())
				.expect("Fixture signing key should load.");
		let issuer = TokenIssuer::new(config, stores.clone(), Arc::new(signer), sink);

		Self {
			store,
			stores,
			catalog: CatalogWriter::new(ctx.clone()),
			agreement: AgreementWriter::new(ctx.clone()),
			purpose: PurposeWriter::new(ctx.clone()),
			client: ClientWriter::new(ctx),
			audit,
			issuer: Arc::new(issuer),
		}
	}

	/// Routes an event to the writer of its stream.
	pub async fn apply(&self, envelope: &EventEnvelope) -> ProjectionOutcome {
		let writer: &dyn ProjectionWriter = match envelope.stream_id.as_str() {
			ESERVICE => &self.catalog,
			AGREEMENT => &self.agreement,
			PURPOSE => &self.purpose,
			CLIENT => &self.client,
			other => panic!("No writer for stream {other}."),
		};

		writer.apply(envelope).await.expect("Event should be projected.")
	}

	/// Projects the fully active chain for a consumer client bound to [`PURPOSE`].
	pub async fn seed_active_consumer(&self) {
		self.apply(&descriptor(1, "EServiceDescriptorPublished", "Published")).await;
		self.apply(&agreement(1, "AgreementActivated", "Active")).await;
		self.apply(&purpose(1, "PurposeActivated", "Active")).await;
		self.apply(&client(1, "ClientAdded", "CONSUMER", &[PURPOSE], json!({}))).await;
	}
}
