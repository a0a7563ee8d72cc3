//! Chain listeners: cursor-driven `Open` event ingestion.
//!
//! One listener runs per configured chain. Each tick it reads the chain
//! head, subtracts the confirmation depth, fetches `Open` events for a
//! bounded window above its cursor, and hands them to the processor in
//! ascending `(block, log index)` order. The cursor advances and
//! persists only after every event in the window was handled, so a
//! crash or a failing handler replays the window instead of skipping it.
//!
//! The poll loop itself is VM-neutral: everything chain-specific sits
//! behind [`EventSource`], with EVM and felt-VM implementations under
//! `implementations/`.

use async_trait::async_trait;
use solver_config::ChainConfig;
use solver_storage::{CursorKey, CursorStore, StorageError};
use solver_types::{OpenEvent, UniversalAddress};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod starknet;
}

/// Errors surfaced by listeners.
#[derive(Debug, Error)]
pub enum ListenerError {
	/// Transport failure; the window is retried with backoff.
	#[error("rpc: {0}")]
	Rpc(String),
	/// A window-fatal decode failure.
	#[error("decode at block {block}: {reason}")]
	Decode { block: u64, reason: String },
	/// Cursor persistence failed.
	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Error type handlers may return; any error halts cursor advancement
/// for the window.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Receives normalized events, one at a time, in order.
///
/// The listener awaits each call before delivering the next event, so a
/// slow processor backpressures ingestion instead of queueing unbounded
/// work. Returning `Ok(false)` means "skipped, but done with it" and
/// advances the cursor; returning an error replays the window.
#[async_trait]
pub trait OpenEventHandler: Send + Sync {
	async fn handle(&self, event: OpenEvent) -> Result<bool, HandlerError>;
}

/// Result of fetching one window from a source.
#[derive(Debug, Default)]
pub struct FetchOutcome {
	/// Decoded events, not necessarily sorted.
	pub events: Vec<OpenEvent>,
	/// Logs that failed to decode and were skipped as non-fatal.
	pub skipped: u64,
}

/// A decode failure classified by the source's decoder.
///
/// Non-fatal failures are single-log anomalies: the log is counted,
/// logged, and skipped, and the window still completes. Fatal failures
/// mean the decoder and the contract disagree about the wire format;
/// the window aborts with the cursor unchanged, the same halt the loop
/// applies to handler errors, because a decoder that misreads one log
/// cannot be trusted with the rest of the window either.
#[derive(Debug)]
pub struct DecodeFailure {
	/// Human-readable cause.
	pub reason: String,
	/// When set, the whole window is aborted and retried.
	pub fatal: bool,
}

impl DecodeFailure {
	/// A single-log anomaly; skip it and keep the window.
	pub fn skip(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
			fatal: false,
		}
	}

	/// A wire-format mismatch; abort the window.
	pub fn fatal(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
			fatal: true,
		}
	}
}

// Bare reasons bubbling out of payload readers are wire-format
// mismatches, so they default to fatal; decoders opt into `skip`
// explicitly.
impl From<String> for DecodeFailure {
	fn from(reason: String) -> Self {
		Self::fatal(reason)
	}
}

/// Chain-specific half of a listener.
#[async_trait]
pub trait EventSource: Send + Sync {
	/// Current head block as reported by the RPC.
	async fn latest_block(&self) -> Result<u64, ListenerError>;

	/// `Open` events in the inclusive range `[from, to]`, filtered by
	/// the entry contract and event selector. Undecodable single logs
	/// are counted in [`FetchOutcome::skipped`]; only failures that
	/// poison the whole window return `Err`.
	async fn fetch_open_events(&self, from: u64, to: u64) -> Result<FetchOutcome, ListenerError>;
}

/// Static configuration for one listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
	/// Chain name used in the cursor file and logs.
	pub chain_name: String,
	/// VM-native chain id, recorded alongside the cursor.
	pub chain_id: u64,
	/// Entry contract emitting `Open`.
	pub contract: UniversalAddress,
	/// Signed starting block: `> 0` absolute, `0` latest (head minus
	/// confirmations), `< 0` that many blocks before head. A persisted
	/// cursor always wins over this.
	pub initial_block: i64,
	/// Pacing between idle polls.
	pub poll_interval_ms: u64,
	/// Depth subtracted from head before indexing.
	pub confirmation_blocks: u64,
	/// Upper bound on blocks per fetch window.
	pub max_block_range: u64,
}

impl From<&ChainConfig> for ListenerConfig {
	fn from(chain: &ChainConfig) -> Self {
		Self {
			chain_name: chain.name.clone(),
			chain_id: chain.chain_id,
			contract: chain.hyperlane_address,
			initial_block: chain.start_block,
			poll_interval_ms: chain.poll_interval_ms,
			confirmation_blocks: chain.confirmation_blocks,
			max_block_range: chain.max_block_range,
		}
	}
}

/// Consecutive failed polls multiply the sleep, capped at this factor.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Cursor-driven poller for one chain.
pub struct ChainListener<S> {
	config: ListenerConfig,
	source: S,
	store: Arc<CursorStore>,
	handler: Arc<dyn OpenEventHandler>,
}

impl<S: EventSource> ChainListener<S> {
	/// Builds a listener; nothing runs until [`run`](Self::run).
	pub fn new(
		config: ListenerConfig,
		source: S,
		store: Arc<CursorStore>,
		handler: Arc<dyn OpenEventHandler>,
	) -> Self {
		Self {
			config,
			source,
			store,
			handler,
		}
	}

	fn cursor_key(&self) -> CursorKey {
		CursorKey {
			chain: self.config.chain_name.clone(),
			chain_id: self.config.chain_id,
			contract: self.config.contract,
		}
	}

	/// Resolves the starting cursor and persists it, so a restart lands
	/// on the same spot regardless of how far the head moved since.
	///
	/// The returned value is the last block considered indexed; the
	/// first fetch starts one above it.
	pub async fn resolve_start(&self) -> Result<u64, ListenerError> {
		let key = self.cursor_key();
		if let Some(cursor) = self.store.get(&key).await? {
			tracing::info!(
				chain = %self.config.chain_name,
				cursor = cursor,
				"resuming from persisted cursor"
			);
			return Ok(cursor);
		}

		let start_block = match self.config.initial_block {
			block if block > 0 => block as u64,
			0 => {
				let head = self.source.latest_block().await?;
				head.saturating_sub(self.config.confirmation_blocks)
			}
			negative => {
				let head = self.source.latest_block().await?;
				head.saturating_sub(negative.unsigned_abs())
			}
		};
		let cursor = start_block.saturating_sub(1);
		let effective = self.store.init_if_absent(&key, cursor).await?;
		tracing::info!(
			chain = %self.config.chain_name,
			cursor = effective,
			"initialized cursor"
		);
		Ok(effective)
	}

	/// Runs one poll tick against the given cursor and returns the new
	/// cursor.
	///
	/// Returns the input cursor unchanged when there is nothing safe to
	/// index yet or when a handler error forces a window replay.
	pub async fn poll_once(&self, cursor: u64) -> Result<u64, ListenerError> {
		let head = self.source.latest_block().await?;
		let safe_head = head.saturating_sub(self.config.confirmation_blocks);
		if safe_head <= cursor {
			return Ok(cursor);
		}

		let from = cursor + 1;
		let to = safe_head.min(cursor + self.config.max_block_range);
		let mut outcome = self.source.fetch_open_events(from, to).await?;
		if outcome.skipped > 0 {
			tracing::warn!(
				chain = %self.config.chain_name,
				window_start = from,
				window_end = to,
				skipped = outcome.skipped,
				"skipped undecodable logs"
			);
		}

		outcome
			.events
			.sort_by_key(|event| (event.block_number, event.log_index));

		for event in outcome.events {
			let order_id = event.order_id;
			let block = event.block_number;
			match self.handler.handle(event).await {
				Ok(processed) => {
					tracing::debug!(
						chain = %self.config.chain_name,
						order_id = %order_id.short(),
						block = block,
						processed = processed,
						phase = "listen",
						"handled open event"
					);
				}
				Err(e) => {
					// Replay the entire window next tick; the cursor
					// must not move past (or up to) the failing event.
					tracing::warn!(
						chain = %self.config.chain_name,
						order_id = %order_id.short(),
						block = block,
						phase = "listen",
						error = %e,
						"handler failed, window will be retried"
					);
					return Ok(cursor);
				}
			}
		}

		self.store.set(&self.cursor_key(), to).await?;
		Ok(to)
	}

	/// Polls until the stop signal fires.
	///
	/// Backlogged windows are processed back-to-back; idle ticks sleep
	/// the configured interval; transport errors widen the sleep up to
	/// [`MAX_BACKOFF_FACTOR`].
	pub async fn run(self, mut stop: broadcast::Receiver<()>) -> Result<(), ListenerError> {
		let mut cursor = tokio::select! {
			resolved = self.resolve_start() => resolved?,
			_ = stop.recv() => return Ok(()),
		};

		let base = tokio::time::Duration::from_millis(self.config.poll_interval_ms.max(1));
		let mut backoff_factor = 1u32;
		loop {
			// The poll itself is never interrupted: an in-flight fill or
			// settle runs to completion and the cursor gets persisted.
			// Shutdown is only observed between polls and during sleeps;
			// the manager's join deadline bounds the drain.
			match stop.try_recv() {
				Err(broadcast::error::TryRecvError::Empty) => {}
				_ => break,
			}

			let sleep = match self.poll_once(cursor).await {
				Ok(new_cursor) if new_cursor > cursor => {
					cursor = new_cursor;
					backoff_factor = 1;
					// Backlog: go straight to the next window.
					continue;
				}
				Ok(_) => {
					backoff_factor = 1;
					base
				}
				Err(e) => {
					backoff_factor = (backoff_factor * 2).min(MAX_BACKOFF_FACTOR);
					tracing::warn!(
						chain = %self.config.chain_name,
						phase = "listen",
						error = %e,
						backoff_factor = backoff_factor,
						"poll failed"
					);
					base * backoff_factor
				}
			};

			tokio::select! {
				_ = tokio::time::sleep(sleep) => {}
				_ = stop.recv() => break,
			}
		}

		tracing::info!(chain = %self.config.chain_name, "listener stopped");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use solver_types::{OrderId, ResolvedCrossChainOrder};
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	struct MockSource {
		head: u64,
		/// block -> events at that block
		events: BTreeMap<u64, Vec<OpenEvent>>,
		windows: Mutex<Vec<(u64, u64)>>,
	}

	impl MockSource {
		fn new(head: u64) -> Self {
			Self {
				head,
				events: BTreeMap::new(),
				windows: Mutex::new(Vec::new()),
			}
		}

		fn with_event(mut self, block: u64, log_index: u64) -> Self {
			self.events
				.entry(block)
				.or_default()
				.push(event_at(block, log_index));
			self
		}
	}

	#[async_trait]
	impl EventSource for MockSource {
		async fn latest_block(&self) -> Result<u64, ListenerError> {
			Ok(self.head)
		}

		async fn fetch_open_events(
			&self,
			from: u64,
			to: u64,
		) -> Result<FetchOutcome, ListenerError> {
			self.windows.lock().unwrap().push((from, to));
			let events = self
				.events
				.range(from..=to)
				.flat_map(|(_, events)| events.clone())
				.collect();
			Ok(FetchOutcome { events, skipped: 0 })
		}
	}

	fn event_at(block: u64, log_index: u64) -> OpenEvent {
		let mut id = [0u8; 32];
		id[..8].copy_from_slice(&block.to_be_bytes());
		id[8..16].copy_from_slice(&log_index.to_be_bytes());
		OpenEvent {
			order_id: OrderId::from_bytes(id),
			sender: UniversalAddress::ZERO,
			origin_chain: "mock".to_string(),
			origin_domain: 1,
			resolved: ResolvedCrossChainOrder {
				origin_chain_id: 1,
				open_deadline: None,
				fill_deadline: u32::MAX,
				max_spent: vec![],
				min_received: vec![],
				fill_instructions: vec![],
			},
			block_number: block,
			log_index,
		}
	}

	#[derive(Default)]
	struct RecordingHandler {
		seen: Mutex<Vec<u64>>,
		fail_on_block: Option<u64>,
	}

	#[async_trait]
	impl OpenEventHandler for RecordingHandler {
		async fn handle(&self, event: OpenEvent) -> Result<bool, HandlerError> {
			self.seen.lock().unwrap().push(event.block_number);
			if self.fail_on_block == Some(event.block_number) {
				return Err("simulated processor failure".into());
			}
			Ok(true)
		}
	}

	fn config(initial_block: i64, confirmations: u64, max_range: u64) -> ListenerConfig {
		ListenerConfig {
			chain_name: "mock".to_string(),
			chain_id: 31337,
			contract: UniversalAddress::from_hex("0xaa").unwrap(),
			initial_block,
			poll_interval_ms: 10,
			confirmation_blocks: confirmations,
			max_block_range: max_range,
		}
	}

	fn store(dir: &tempfile::TempDir) -> Arc<CursorStore> {
		Arc::new(CursorStore::new(dir.path().join("state.json")))
	}

	#[tokio::test]
	async fn cold_start_latest_persists_safe_head() {
		// Head 1000, confirmations 3, SOLVER_START_BLOCK=0: after one
		// poll with no events the persisted cursor is 997 and the
		// handler was never invoked.
		let dir = tempfile::tempdir().unwrap();
		let source = MockSource::new(1000);
		let handler = Arc::new(RecordingHandler::default());
		let listener = ChainListener::new(config(0, 3, 1000), source, store(&dir), handler.clone());

		let cursor = listener.resolve_start().await.unwrap();
		let cursor = listener.poll_once(cursor).await.unwrap();

		assert_eq!(cursor, 997);
		assert_eq!(
			listener.store.get(&listener.cursor_key()).await.unwrap(),
			Some(997)
		);
		assert!(handler.seen.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn backfill_is_bounded_by_max_range() {
		// Cursor 100, head 10000, range 500: one poll covers [101, 600]
		// in order and persists 600.
		let source = MockSource::new(10000)
			.with_event(101, 0)
			.with_event(350, 0)
			.with_event(600, 0)
			.with_event(601, 0); // outside the window
		let handler = Arc::new(RecordingHandler::default());
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(1, 0, 500), source, store(&dir), handler.clone());

		listener
			.store
			.set(&listener.cursor_key(), 100)
			.await
			.unwrap();
		let cursor = listener.poll_once(100).await.unwrap();

		assert_eq!(cursor, 600);
		assert_eq!(*handler.seen.lock().unwrap(), vec![101, 350, 600]);
		assert_eq!(
			*listener.source.windows.lock().unwrap(),
			vec![(101, 600)]
		);
		assert_eq!(
			listener.store.get(&listener.cursor_key()).await.unwrap(),
			Some(600)
		);
	}

	#[tokio::test]
	async fn handler_failure_halts_cursor_and_replays_window() {
		// Events at 150, 160, 170; the handler fails on 160. The cursor
		// stays at 149 and the next poll re-delivers all three.
		let source = MockSource::new(200)
			.with_event(150, 0)
			.with_event(160, 0)
			.with_event(170, 0);
		let handler = Arc::new(RecordingHandler {
			fail_on_block: Some(160),
			..Default::default()
		});
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(1, 0, 1000), source, store(&dir), handler.clone());

		listener
			.store
			.set(&listener.cursor_key(), 149)
			.await
			.unwrap();
		let cursor = listener.poll_once(149).await.unwrap();

		assert_eq!(cursor, 149);
		// 170 was never attempted after the failure.
		assert_eq!(*handler.seen.lock().unwrap(), vec![150, 160]);
		assert_eq!(
			listener.store.get(&listener.cursor_key()).await.unwrap(),
			Some(149)
		);

		// Same window again on the next tick.
		let _ = listener.poll_once(cursor).await.unwrap();
		assert_eq!(*handler.seen.lock().unwrap(), vec![150, 160, 150, 160]);
	}

	#[tokio::test]
	async fn events_are_delivered_in_block_then_log_order() {
		let source = MockSource::new(100)
			.with_event(50, 1)
			.with_event(50, 0)
			.with_event(40, 2);
		let handler = Arc::new(RecordingHandler::default());
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(40, 0, 100), source, store(&dir), handler.clone());

		let cursor = listener.resolve_start().await.unwrap();
		assert_eq!(cursor, 39);
		listener.poll_once(cursor).await.unwrap();
		assert_eq!(*handler.seen.lock().unwrap(), vec![40, 50, 50]);
	}

	#[tokio::test]
	async fn persisted_cursor_overrides_initial_block() {
		let source = MockSource::new(1000);
		let handler = Arc::new(RecordingHandler::default());
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(500, 0, 100), source, store(&dir), handler);

		listener
			.store
			.set(&listener.cursor_key(), 800)
			.await
			.unwrap();
		assert_eq!(listener.resolve_start().await.unwrap(), 800);
	}

	#[tokio::test]
	async fn negative_initial_block_counts_back_from_head() {
		let source = MockSource::new(1000);
		let handler = Arc::new(RecordingHandler::default());
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(-10, 0, 100), source, store(&dir), handler);

		// Start indexing at head - 10 = 990, so the cursor sits at 989.
		assert_eq!(listener.resolve_start().await.unwrap(), 989);
	}

	#[tokio::test]
	async fn idle_when_head_within_confirmation_depth() {
		let source = MockSource::new(100).with_event(99, 0);
		let handler = Arc::new(RecordingHandler::default());
		let dir = tempfile::tempdir().unwrap();
		let listener = ChainListener::new(config(1, 5, 100), source, store(&dir), handler.clone());

		// safe head is 95; cursor 95 means nothing to do.
		let cursor = listener.poll_once(95).await.unwrap();
		assert_eq!(cursor, 95);
		assert!(listener.source.windows.lock().unwrap().is_empty());
		assert!(handler.seen.lock().unwrap().is_empty());
	}
}
