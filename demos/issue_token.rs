//! Projects a consumer's platform state from upstream events, then issues an access token for a
//! client assertion signed with the consumer's registered key.
//!
//! 1. Feed one [`ChannelEventSource`] per event family and drain it with a [`ProjectionConsumer`].
//! 2. Sign a client assertion with the key registered by the `ClientAdded` event.
//! 3. Ask the [`TokenIssuer`] for a token and print its audience and lifetime.

// std
use std::sync::Arc;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use color_eyre::Result;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::watch;
// self
use platform_token_engine::{
	auth::{KeyId, PemTokenSigner},
	config::IssuerConfig,
	events::EventEnvelope,
	issuance::{MemoryAuditSink, TokenIssuer, TokenRequest},
	projection::{
		AgreementWriter, CatalogWriter, ChannelEventSource, ClientWriter, ProjectionConsumer,
		ProjectionWriter, PurposeWriter, WriterContext,
	},
	store::{StoreClient, StoreConfig},
};

const CLIENT: &str = "5c1d2c3e-7f3a-4c8e-9a61-0b9b8f6f2a10";
const TENANT: &str = "1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d";
const ESERVICE: &str = "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e";
const DESCRIPTOR: &str = "3c4d5e6f-7a8b-4c9d-8e1f-2a3b4c5d6e7f";
const AGREEMENT: &str = "4d5e6f7a-8b9c-4d0e-9f2a-3b4c5d6e7f8a";
const PURPOSE: &str = "0f5a3c7e-1d2b-4e6f-8a9b-3c4d5e6f7a8b";
const CLIENT_PRIVATE: &str = include_str!("../tests/fixtures/client_private.pem");
const CLIENT_PUBLIC: &str = include_str!("../tests/fixtures/client_public.pem");
const ISSUER_PRIVATE: &str = include_str!("../tests/fixtures/issuer_private.pem");

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let config = IssuerConfig::from_json(
		r#"{
			"issuer": "auth.demo",
			"audiences": ["auth.demo/client-assertion"],
			"apiAudience": ["api.demo"],
			"signingKid": "demo-signing-key"
		}"#,
	)?;
	let stores = StoreClient::connect(&StoreConfig::Memory)?;
	let ctx = WriterContext::new(stores.clone(), config.retry);

	project(Arc::new(CatalogWriter::new(ctx.clone())), vec![EventEnvelope::new(
		ESERVICE,
		1,
		"EServiceDescriptorPublished",
		json!({
			"descriptorId": DESCRIPTOR,
			"eservice": {
				"id": ESERVICE,
				"producerId": ESERVICE,
				"descriptors": [{
					"id": DESCRIPTOR,
					"state": "Published",
					"audience": ["eservice.demo"],
					"voucherLifespan": 600
				}]
			}
		}),
	)])
	.await?;
	project(Arc::new(AgreementWriter::new(ctx.clone())), vec![EventEnvelope::new(
		AGREEMENT,
		1,
		"AgreementActivated",
		json!({
			"agreement": {
				"id": AGREEMENT,
				"eserviceId": ESERVICE,
				"descriptorId": DESCRIPTOR,
				"consumerId": TENANT,
				"producerId": ESERVICE,
				"state": "Active"
			}
		}),
	)])
	.await?;
	project(Arc::new(PurposeWriter::new(ctx.clone())), vec![EventEnvelope::new(
		PURPOSE,
		1,
		"PurposeActivated",
		json!({
			"purpose": {
				"id": PURPOSE,
				"eserviceId": ESERVICE,
				"consumerId": TENANT,
				"versions": [{
					"id": "5e6f7a8b-9c0d-4e1f-8a3b-4c5d6e7f8a9b",
					"state": "Active",
					"createdAt": "2025-01-01T00:00:00Z"
				}]
			}
		}),
	)])
	.await?;
	project(Arc::new(ClientWriter::new(ctx)), vec![EventEnvelope::new(
		CLIENT,
		1,
		"ClientAdded",
		json!({
			"client": {
				"id": CLIENT,
				"consumerId": TENANT,
				"kind": "CONSUMER",
				"purposes": [PURPOSE],
				"keys": [{ "kid": "demo-key", "encodedPem": STANDARD.encode(CLIENT_PUBLIC) }]
			}
		}),
	)])
	.await?;

	let signer = PemTokenSigner::from_rsa_pem(
		KeyId::new("demo-signing-key")?,
		ISSUER_PRIVATE.as_bytes(),
	)?;
	let audit = Arc::new(MemoryAuditSink::default());
	let issuer = TokenIssuer::new(config, stores, Arc::new(signer), audit.clone());
	let request = TokenRequest::new(client_assertion()?).with_client_id(CLIENT);
	let issued = issuer.issue(&request).await?;

	println!(
		"Issued a {}s token for audience {:?}; {} audit record(s) written.",
		issued.expires_in,
		issued.token.claims.aud,
		audit.records().len(),
	);

	Ok(())
}

async fn project(writer: Arc<dyn ProjectionWriter>, events: Vec<EventEnvelope>) -> Result<()> {
	let (publisher, source) = ChannelEventSource::bounded(events.len().max(1));

	for event in events {
		publisher.publish(event).await?;
	}

	drop(publisher);

	let consumer = ProjectionConsumer::new(source, writer);
	let (_shutdown_tx, shutdown) = watch::channel(false);
	let stats = consumer.run(shutdown).await?;

	println!("{consumer:?} finished: {stats:?}.");

	Ok(())
}

fn client_assertion() -> Result<String> {
	let now = OffsetDateTime::now_utc().unix_timestamp();
	let mut header = Header::new(Algorithm::RS256);

	header.kid = Some("demo-key".into());

	let claims: Value = json!({
		"iss": CLIENT,
		"sub": CLIENT,
		"aud": ["auth.demo/client-assertion"],
		"jti": uuid::Uuid::new_v4().to_string(),
		"iat": now,
		"exp": now + 60,
		"purposeId": PURPOSE,
	});

	let key = EncodingKey::from_rsa_pem(CLIENT_PRIVATE.as_bytes())?;

	Ok(jsonwebtoken::encode(&header, &claims, &key)?)
}
