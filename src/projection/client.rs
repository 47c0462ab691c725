//! Client and key projection into the token-generation table.
//!
//! Every registered key yields one entry per bound purpose (`CLIENTKIDPURPOSE#`), or a single
//! purpose-less entry (`CLIENTKID#`) for API clients and consumer clients without purposes.
//! Entries remember the client-stream version that wrote them, so older client events never
//! overwrite or delete newer key material.

// self
use crate::{
	_prelude::*,
	auth::PurposeId,
	error::TransientError,
	events::{
		ClientEvent, ClientEventKind, ClientSnapshot, EventEnvelope, EventFamily, KeySnapshot,
	},
	obs,
	projection::{
		FanOutReport, ProjectionFuture, ProjectionOutcome, ProjectionWriter, WriterContext,
		fanout::{self, Patched},
		observed, pause,
	},
	state::{ClientKind, Linked, LookupKey, PurposeBinding, TokenGenStateEntry, TokenGenStateKey},
	store::WriteOutcome,
};

/// Writes, rebinds, and deletes token-generation entries as clients change.
#[derive(Clone, Debug)]
pub struct ClientWriter {
	ctx: WriterContext,
}
impl ClientWriter {
	/// Creates a writer over the shared stores.
	pub fn new(ctx: WriterContext) -> Self {
		Self { ctx }
	}

	async fn handle(&self, event: ClientEvent) -> Result<ProjectionOutcome> {
		use ClientEventKind as Kind;

		let version = event.version;
		let mut report = FanOutReport::default();

		match event.kind {
			Kind::ClientAdded => {
				let client = event.require(&event.payload.client, "client")?;
				let keys = client.keys.iter().collect::<Vec<_>>();

				self.register(client, &keys, version, &mut report).await?;
			},
			Kind::ClientKeyAdded => {
				let client = event.require(&event.payload.client, "client")?;
				let kid = event.require(&event.payload.kid, "kid")?;
				let key = client.key(kid).ok_or(Error::MissingEventData {
					event_type: event.kind.as_str(),
					field: "client.keys",
				})?;

				self.register(client, &[key], version, &mut report).await?;
			},
			Kind::ClientKeyDeleted => {
				let client = event.require(&event.payload.client, "client")?;
				let kid = event.require(&event.payload.kid, "kid")?;
				let lookup = LookupKey::ClientKid(client.id.clone(), kid.clone());

				self.remove_matching(&lookup, version, &mut report).await?;
			},
			Kind::ClientDeleted => {
				let client = event.require(&event.payload.client, "client")?;

				self.remove_matching(&LookupKey::Client(client.id.clone()), version, &mut report)
					.await?;
			},
			Kind::ClientPurposeAdded => {
				let client = event.require(&event.payload.client, "client")?;
				let purpose_id = event.require(&event.payload.purpose_id, "purposeId")?;

				if client.kind == ClientKind::Api {
					return Ok(ProjectionOutcome::Ignored);
				}

				let keys = client.keys.iter().collect::<Vec<_>>();

				self.write_scope(client, &keys, Some(purpose_id), version, &mut report).await?;

				for key in &client.keys {
					let unscoped = TokenGenStateKey::client_kid(client.id.clone(), key.kid.clone());

					if let Some(entry) = self.ctx.stores.token_gen.get(&unscoped).await? {
						report.record(self.remove_entry(entry, version).await?);
					}
				}
			},
			Kind::ClientPurposeRemoved => {
				let client = event.require(&event.payload.client, "client")?;
				let purpose_id = event.require(&event.payload.purpose_id, "purposeId")?;

				if client.kind == ClientKind::Api {
					return Ok(ProjectionOutcome::Ignored);
				}

				let lookup = LookupKey::ClientPurpose(client.id.clone(), purpose_id.clone());

				self.remove_matching(&lookup, version, &mut report).await?;

				if client.purposes.is_empty() {
					let keys = client.keys.iter().collect::<Vec<_>>();

					self.write_scope(client, &keys, None, version, &mut report).await?;
				}
			},
			Kind::ClientUserAdded
			| Kind::ClientUserDeleted
			| Kind::ClientAdminSet
			| Kind::ClientAdminRemoved => return Ok(ProjectionOutcome::Ignored),
		}

		if report.matched > 0 && report.updated == 0 {
			return Ok(ProjectionOutcome::Discarded);
		}

		Ok(ProjectionOutcome::Applied(report))
	}

	async fn register(
		&self,
		client: &ClientSnapshot,
		keys: &[&KeySnapshot],
		version: u64,
		report: &mut FanOutReport,
	) -> Result<()> {
		let scopes = match client.kind {
			ClientKind::Consumer if !client.purposes.is_empty() =>
				client.purposes.iter().map(Some).collect::<Vec<_>>(),
			ClientKind::Consumer | ClientKind::Api => vec![None],
		};

		for purpose_id in scopes {
			self.write_scope(client, keys, purpose_id, version, report).await?;
		}

		Ok(())
	}

	async fn write_scope(
		&self,
		client: &ClientSnapshot,
		keys: &[&KeySnapshot],
		purpose_id: Option<&PurposeId>,
		version: u64,
		report: &mut FanOutReport,
	) -> Result<()> {
		let binding = match purpose_id {
			Some(purpose_id) =>
				Some(fanout::resolve_binding(self.ctx.stores.platform.as_ref(), purpose_id).await?),
			None => None,
		};

		for key in keys {
			report.record(self.upsert(client, key, binding.as_ref(), version).await?);
		}

		Ok(())
	}

	async fn upsert(
		&self,
		client: &ClientSnapshot,
		key: &KeySnapshot,
		resolved: Option<&PurposeBinding>,
		version: u64,
	) -> Result<Patched> {
		let store = self.ctx.stores.token_gen.as_ref();
		let entry_key = match resolved {
			Some(binding) => TokenGenStateKey::client_kid_purpose(
				client.id.clone(),
				key.kid.clone(),
				binding.purpose_id.clone(),
			),
			None => TokenGenStateKey::client_kid(client.id.clone(), key.kid.clone()),
		};
		let mut attempt = 0;

		loop {
			attempt += 1;

			let current = store.get(&entry_key).await?;

			if let Some(stored) = current.as_ref().filter(|stored| stored.client_version >= version)
			{
				obs::trace_stale_discard(&entry_key, version, stored.client_version);

				return Ok(Patched::Unchanged);
			}

			let stored_binding = current.as_ref().and_then(|stored| stored.binding.as_ref());
			let binding = match (stored_binding, resolved) {
				(Some(stored), Some(resolved)) => Some(freshest_binding(stored, resolved)),
				(_, resolved) => resolved.cloned(),
			};
			let entry = TokenGenStateEntry {
				key: entry_key.clone(),
				revision: 0,
				client_version: version,
				consumer_id: client.consumer_id.clone(),
				client_kind: client.kind,
				public_key: key.encoded_pem.clone(),
				algorithm: key.algorithm,
				binding,
				updated_at: OffsetDateTime::now_utc(),
			};
			let expected = current.map(|stored| stored.revision);

			if store.put(entry, expected).await? == WriteOutcome::Written {
				return Ok(Patched::Updated);
			}
			if attempt >= self.ctx.retry.max_attempts {
				return Err(TransientError::WriteConflict {
					key: entry_key.render(),
					attempts: attempt,
				}
				.into());
			}

			pause(&self.ctx.retry, attempt).await;
		}
	}

	async fn remove_matching(
		&self,
		lookup: &LookupKey,
		version: u64,
		report: &mut FanOutReport,
	) -> Result<()> {
		for entry in self.ctx.stores.token_gen.query(lookup).await? {
			report.record(self.remove_entry(entry, version).await?);
		}

		Ok(())
	}

	async fn remove_entry(&self, mut entry: TokenGenStateEntry, version: u64) -> Result<Patched> {
		let store = self.ctx.stores.token_gen.as_ref();
		let mut attempt = 0;

		loop {
			attempt += 1;

			if entry.client_version >= version {
				obs::trace_stale_discard(&entry.key, version, entry.client_version);

				return Ok(Patched::Unchanged);
			}
			if store.delete(&entry.key, entry.revision).await? == WriteOutcome::Written {
				return Ok(Patched::Updated);
			}
			if attempt >= self.ctx.retry.max_attempts {
				return Err(TransientError::WriteConflict {
					key: entry.key.render(),
					attempts: attempt,
				}
				.into());
			}

			pause(&self.ctx.retry, attempt).await;

			match store.get(&entry.key).await? {
				Some(fresh) => entry = fresh,
				None => return Ok(Patched::Unchanged),
			}
		}
	}
}
impl ProjectionWriter for ClientWriter {
	fn family(&self) -> EventFamily {
		EventFamily::Client
	}

	fn apply<'a>(&'a self, envelope: &'a EventEnvelope) -> ProjectionFuture<'a, ProjectionOutcome> {
		observed(EventFamily::Client, async move { self.handle(envelope.decode()?).await })
	}
}

// Keeps whichever copy of each block is newer; stored blocks may already carry fan-out updates
// that postdate the platform-state read.
fn freshest_binding(stored: &PurposeBinding, resolved: &PurposeBinding) -> PurposeBinding {
	fn pick<T>(stored: &Option<Linked<T>>, resolved: &Option<Linked<T>>) -> Option<Linked<T>>
	where
		T: Clone,
	{
		match (stored, resolved) {
			(Some(stored), Some(resolved)) if resolved.version > stored.version =>
				Some(resolved.clone()),
			(Some(stored), _) => Some(stored.clone()),
			(None, resolved) => resolved.clone(),
		}
	}

	PurposeBinding {
		purpose_id: resolved.purpose_id.clone(),
		eservice_id: resolved.eservice_id.clone().or_else(|| stored.eservice_id.clone()),
		purpose: pick(&stored.purpose, &resolved.purpose),
		agreement: pick(&stored.agreement, &resolved.agreement),
		descriptor: pick(&stored.descriptor, &resolved.descriptor),
	}
}
