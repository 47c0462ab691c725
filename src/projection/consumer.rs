//! Pull loop feeding one writer from an event source.
//!
//! Offsets are committed only after the writer returned successfully, so a failed or interrupted
//! event is delivered again. A shutdown signal is honoured between events, never in the middle
//! of one.

// crates.io
use async_lock::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio::sync::{mpsc, watch};
// self
use crate::{
	_prelude::*,
	error::TransientError,
	events::EventEnvelope,
	obs,
	projection::{ProjectionFuture, ProjectionOutcome, ProjectionWriter},
};

/// Event together with the source position to commit once it is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedEvent {
	/// Source-assigned position.
	pub offset: u64,
	/// The event itself.
	pub envelope: EventEnvelope,
}

/// At-least-once event source for one consumer group.
pub trait EventSource
where
	Self: Send + Sync,
{
	/// Waits for the next event; `None` once the source is exhausted.
	fn next(&self) -> ProjectionFuture<'_, Option<ReceivedEvent>>;

	/// Marks everything up to and including `offset` as processed.
	fn commit(&self, offset: u64) -> ProjectionFuture<'_, ()>;
}

/// In-process [`EventSource`] backed by a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelEventSource {
	receiver: AsyncMutex<mpsc::Receiver<ReceivedEvent>>,
	committed: Arc<Mutex<Option<u64>>>,
}
impl ChannelEventSource {
	/// Creates a source and the publisher feeding it.
	pub fn bounded(capacity: usize) -> (EventPublisher, Self) {
		let (sender, receiver) = mpsc::channel(capacity);
		let committed = Arc::new(Mutex::new(None));
		let publisher = EventPublisher {
			sender,
			next_offset: Arc::new(Mutex::new(0)),
			committed: committed.clone(),
		};

		(publisher, Self { receiver: AsyncMutex::new(receiver), committed })
	}
}
impl EventSource for ChannelEventSource {
	fn next(&self) -> ProjectionFuture<'_, Option<ReceivedEvent>> {
		Box::pin(async move { Ok(self.receiver.lock().await.recv().await) })
	}

	fn commit(&self, offset: u64) -> ProjectionFuture<'_, ()> {
		Box::pin(async move {
			let mut committed = self.committed.lock();

			*committed = Some(committed.map_or(offset, |current| current.max(offset)));

			Ok(())
		})
	}
}

/// Sending half of a [`ChannelEventSource`].
#[derive(Clone, Debug)]
pub struct EventPublisher {
	sender: mpsc::Sender<ReceivedEvent>,
	next_offset: Arc<Mutex<u64>>,
	committed: Arc<Mutex<Option<u64>>>,
}
impl EventPublisher {
	/// Enqueues an event and returns the offset assigned to it.
	pub async fn publish(&self, envelope: EventEnvelope) -> Result<u64> {
		let offset = {
			let mut next = self.next_offset.lock();
			let offset = *next;

			*next += 1;

			offset
		};

		self.sender
			.send(ReceivedEvent { offset, envelope })
			.await
			.map_err(|_| TransientError::SourceClosed)?;

		Ok(offset)
	}

	/// Highest offset the consumer has committed so far.
	pub fn committed(&self) -> Option<u64> {
		*self.committed.lock()
	}
}

/// Per-outcome counters of a consumer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
	/// Events that changed stored state.
	pub applied: u64,
	/// Stale or duplicate events.
	pub discarded: u64,
	/// Events without authorization relevance.
	pub ignored: u64,
}
impl ConsumerStats {
	fn record(&mut self, outcome: ProjectionOutcome) {
		match outcome {
			ProjectionOutcome::Applied(_) => self.applied += 1,
			ProjectionOutcome::Discarded => self.discarded += 1,
			ProjectionOutcome::Ignored => self.ignored += 1,
		}
	}
}

/// Drives a single writer from a single source.
pub struct ProjectionConsumer<S> {
	source: S,
	writer: Arc<dyn ProjectionWriter>,
	in_flight: AsyncRwLock<()>,
}
impl<S> ProjectionConsumer<S>
where
	S: EventSource,
{
	/// Pairs a source with the writer for its family.
	pub fn new(source: S, writer: Arc<dyn ProjectionWriter>) -> Self {
		Self { source, writer, in_flight: AsyncRwLock::new(()) }
	}

	/// Applies one event and commits it; `None` once the source is exhausted.
	///
	/// A failed event is logged and left uncommitted.
	pub async fn process_next(&self) -> Result<Option<ProjectionOutcome>> {
		let Some(event) = self.source.next().await? else { return Ok(None) };

		self.process(event).await.map(Some)
	}

	/// Processes events until the source is exhausted, shutdown is signalled, or an event fails.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<ConsumerStats> {
		let mut stats = ConsumerStats::default();

		loop {
			if *shutdown.borrow() {
				break;
			}

			let received = tokio::select! {
				biased;
				changed = shutdown.changed() => match changed {
					Ok(()) => continue,
					Err(_) => break,
				},
				received = self.source.next() => received?,
			};
			let Some(event) = received else { break };

			stats.record(self.process(event).await?);
		}

		Ok(stats)
	}

	/// Waits until no event is being applied.
	pub async fn drain(&self) {
		let _idle = self.in_flight.write().await;
	}

	async fn process(&self, event: ReceivedEvent) -> Result<ProjectionOutcome> {
		let _in_flight = self.in_flight.read().await;
		let envelope = &event.envelope;
		let outcome = self.writer.apply(envelope).await.inspect_err(|e| {
			obs::trace_event_failure(&envelope.stream_id, envelope.version, e);
		})?;

		self.source.commit(event.offset).await?;

		Ok(outcome)
	}
}
impl<S> Debug for ProjectionConsumer<S> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProjectionConsumer").field("family", &self.writer.family()).finish()
	}
}
