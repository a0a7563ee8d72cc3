//! Felt-VM `Open` event source.
//!
//! Events are fetched with the RPC event filter (contract address plus
//! the `Open` selector key) and paginated with continuation tokens. The
//! payload is Cairo serde: `u256` values as `(low, high)` felt pairs,
//! arrays length-prefixed, and `origin_data` as
//! `[byte_length, word_count, word_0..word_n]` big-endian 16-byte words.
//!
//! Payload layout, in order: order id (u256), sender, origin chain id
//! (u64), open deadline (u32, zero for none), fill deadline (u32), then
//! the three length-prefixed arrays of the resolved order: max_spent and
//! min_received as `{token, amount: u256, recipient, chain_id}`, and
//! fill_instructions as `{destination_chain_id, destination_settler,
//! origin_data bytes}`.
//!
//! Decode failures are classified like the EVM source: a zero order id
//! or a missing block number skips the single event, while a payload
//! that violates the layout above aborts the window, unless the chain
//! is configured to skip malformed events.

use crate::{DecodeFailure, EventSource, FetchOutcome, ListenerError};
use async_trait::async_trait;
use solver_config::ChainConfig;
use solver_types::{
	codec, FillInstruction, OpenEvent, OrderId, Output, ResolvedCrossChainOrder, UniversalAddress,
};
use starknet::core::types::{BlockId, EmittedEvent, EventFilter, Felt};
use starknet::macros::selector;
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::Provider;
use url::Url;

/// Event key the entry contract emits `Open` under.
pub const OPEN_EVENT_KEY: Felt = selector!("Open");

/// Events fetched per RPC page.
const EVENT_CHUNK_SIZE: u64 = 200;

/// Event source for one felt-VM origin chain.
pub struct FeltEventSource {
	chain_name: String,
	/// Hyperlane domain of this origin chain.
	domain: u32,
	contract: Felt,
	/// Demotes fatal decode failures to skips for this chain.
	skip_malformed_events: bool,
	provider: JsonRpcClient<HttpTransport>,
}

impl FeltEventSource {
	/// Builds a source for the given chain.
	pub fn connect(config: &ChainConfig) -> Result<Self, ListenerError> {
		let url = Url::parse(&config.rpc_url)
			.map_err(|e| ListenerError::Rpc(format!("invalid RPC URL: {}", e)))?;
		let contract = config
			.hyperlane_address
			.to_felt_bytes()
			.map_err(|e| ListenerError::Rpc(e.to_string()))?;
		Ok(Self {
			chain_name: config.name.clone(),
			domain: config.domain,
			contract: Felt::from_bytes_be(&contract),
			skip_malformed_events: config.skip_malformed_events,
			provider: JsonRpcClient::new(HttpTransport::new(url)),
		})
	}

	fn normalize(&self, event: &EmittedEvent, log_index: u64) -> Result<OpenEvent, DecodeFailure> {
		let block_number = event
			.block_number
			.ok_or_else(|| DecodeFailure::skip("event without block number"))?;
		let mut reader = FeltReader::new(&event.data);

		let low = reader.next_u128()?;
		let high = reader.next_u128()?;
		let order_id = OrderId::from_u256_parts(low, high);
		if order_id.is_zero() {
			return Err(DecodeFailure::skip("zero order id"));
		}

		let sender = reader.next_address()?;
		let origin_chain_id = reader.next_u64()?;
		let open_deadline = reader.next_u32()?;
		let fill_deadline = reader.next_u32()?;

		let max_spent = reader.read_outputs()?;
		let min_received = reader.read_outputs()?;

		let instruction_count = reader.next_u64()?;
		let mut fill_instructions = Vec::with_capacity(instruction_count as usize);
		for _ in 0..instruction_count {
			let destination_chain_id = reader.next_u64()?;
			let destination_settler = reader.next_address()?;
			let byte_length = reader.next_u64()?;
			let word_count = reader.next_u64()?;
			let mut words = Vec::with_capacity(word_count as usize);
			for _ in 0..word_count {
				words.push(reader.next_u128()?);
			}
			let origin_data =
				codec::words_to_origin_data(byte_length, &words).map_err(|e| e.to_string())?;
			fill_instructions.push(FillInstruction {
				destination_chain_id,
				destination_settler,
				origin_data,
			});
		}

		let normalized = OpenEvent {
			order_id,
			sender,
			origin_chain: self.chain_name.clone(),
			origin_domain: self.domain,
			resolved: ResolvedCrossChainOrder {
				origin_chain_id,
				open_deadline: (open_deadline != 0).then_some(open_deadline),
				fill_deadline,
				max_spent,
				min_received,
				fill_instructions,
			},
			block_number,
			log_index,
		};
		if !normalized.resolved.is_well_formed() {
			return Err(DecodeFailure::fatal(
				"max_spent and fill_instructions do not correspond",
			));
		}
		Ok(normalized)
	}

	fn normalize_events(&self, events: &[EmittedEvent]) -> Result<FetchOutcome, ListenerError> {
		let mut outcome = FetchOutcome::default();
		for (log_index, event) in events.iter().enumerate() {
			match self.normalize(event, log_index as u64) {
				Ok(normalized) => outcome.events.push(normalized),
				Err(failure) if failure.fatal && !self.skip_malformed_events => {
					return Err(ListenerError::Decode {
						block: event.block_number.unwrap_or(0),
						reason: failure.reason,
					});
				}
				Err(failure) => {
					tracing::warn!(
						chain = %self.chain_name,
						block = event.block_number.unwrap_or(0),
						phase = "listen",
						fatal = failure.fatal,
						reason = %failure.reason,
						"skipping undecodable event"
					);
					outcome.skipped += 1;
				}
			}
		}
		Ok(outcome)
	}
}

#[async_trait]
impl EventSource for FeltEventSource {
	async fn latest_block(&self) -> Result<u64, ListenerError> {
		self.provider
			.block_number()
			.await
			.map_err(|e| ListenerError::Rpc(format!("starknet_blockNumber failed: {}", e)))
	}

	async fn fetch_open_events(&self, from: u64, to: u64) -> Result<FetchOutcome, ListenerError> {
		let filter = EventFilter {
			from_block: Some(BlockId::Number(from)),
			to_block: Some(BlockId::Number(to)),
			address: Some(self.contract),
			keys: Some(vec![vec![OPEN_EVENT_KEY]]),
		};

		let mut raw_events = Vec::new();
		let mut continuation_token: Option<String> = None;
		loop {
			let page = self
				.provider
				.get_events(filter.clone(), continuation_token, EVENT_CHUNK_SIZE)
				.await
				.map_err(|e| ListenerError::Rpc(format!("starknet_getEvents failed: {}", e)))?;

			raw_events.extend(page.events);
			continuation_token = page.continuation_token;
			if continuation_token.is_none() {
				break;
			}
		}

		self.normalize_events(&raw_events)
	}
}

/// Sequential reader over a felt payload. Every failure is a layout
/// violation; callers decide whether that poisons the window.
struct FeltReader<'a> {
	data: &'a [Felt],
	position: usize,
}

impl<'a> FeltReader<'a> {
	fn new(data: &'a [Felt]) -> Self {
		Self { data, position: 0 }
	}

	fn next(&mut self) -> Result<&'a Felt, String> {
		let felt = self
			.data
			.get(self.position)
			.ok_or_else(|| format!("payload truncated at felt {}", self.position))?;
		self.position += 1;
		Ok(felt)
	}

	fn next_u128(&mut self) -> Result<u128, String> {
		let word = self.next()?.to_bytes_be();
		if word[..16].iter().any(|b| *b != 0) {
			return Err("felt exceeds u128".to_string());
		}
		let mut tail = [0u8; 16];
		tail.copy_from_slice(&word[16..]);
		Ok(u128::from_be_bytes(tail))
	}

	fn next_u64(&mut self) -> Result<u64, String> {
		u64::try_from(self.next_u128()?).map_err(|_| "felt exceeds u64".to_string())
	}

	fn next_u32(&mut self) -> Result<u32, String> {
		u32::try_from(self.next_u128()?).map_err(|_| "felt exceeds u32".to_string())
	}

	fn next_address(&mut self) -> Result<UniversalAddress, String> {
		UniversalAddress::from_felt_bytes(self.next()?.to_bytes_be()).map_err(|e| e.to_string())
	}

	fn read_outputs(&mut self) -> Result<Vec<Output>, String> {
		let count = self.next_u64()?;
		let mut outputs = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let token = self.next_address()?;
			let low = self.next_u128()?;
			let high = self.next_u128()?;
			let recipient = self.next_address()?;
			let chain_id = self.next_u64()?;
			outputs.push(Output {
				token,
				amount: codec::u128_pair_to_u256(low, high),
				recipient,
				chain_id,
			});
		}
		Ok(outputs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::U256;

	fn source() -> FeltEventSource {
		FeltEventSource {
			chain_name: "starknet".to_string(),
			domain: 10066329,
			contract: Felt::from(0xaa_u64),
			skip_malformed_events: false,
			provider: JsonRpcClient::new(HttpTransport::new(
				Url::parse("http://localhost:5050").unwrap(),
			)),
		}
	}

	fn push_output(data: &mut Vec<Felt>, token: u64, amount: u128, recipient: u64, chain: u64) {
		data.push(Felt::from(token));
		data.push(Felt::from(amount));
		data.push(Felt::ZERO); // amount high half
		data.push(Felt::from(recipient));
		data.push(Felt::from(chain));
	}

	fn sample_payload(order_id: OrderId, origin_data: &[u8]) -> Vec<Felt> {
		let (low, high) = order_id.u256_parts();
		let mut data = vec![
			Felt::from(low),
			Felt::from(high),
			Felt::from(0x1234_u64),       // sender
			Felt::from(393402133025997798_u64), // origin chain id
			Felt::ZERO,                   // open deadline: none
			Felt::from(1_900_000_000_u64), // fill deadline
		];
		data.push(Felt::ONE); // max_spent length
		push_output(&mut data, 0x11, 1000, 0x22, 11155111);
		data.push(Felt::ONE); // min_received length
		push_output(&mut data, 0x33, 1100, 0x44, 10066329);

		data.push(Felt::ONE); // fill_instructions length
		data.push(Felt::from(11155111_u64)); // destination chain id
		data.push(Felt::from(0x55_u64)); // destination settler
		let (byte_length, words) = codec::origin_data_to_words(origin_data);
		data.push(Felt::from(byte_length));
		data.push(Felt::from(words.len() as u64));
		data.extend(words.into_iter().map(Felt::from));
		data
	}

	fn emitted(data: Vec<Felt>, block: u64) -> EmittedEvent {
		EmittedEvent {
			from_address: Felt::from(0xaa_u64),
			keys: vec![OPEN_EVENT_KEY],
			data,
			block_hash: Some(Felt::ONE),
			block_number: Some(block),
			transaction_hash: Felt::TWO,
		}
	}

	#[test]
	fn normalizes_felt_payload() {
		let order_id = OrderId::from_bytes([7u8; 32]);
		let origin_data: Vec<u8> = (0..20).collect();
		let event = source()
			.normalize(&emitted(sample_payload(order_id, &origin_data), 42), 5)
			.unwrap();

		assert_eq!(event.order_id, order_id);
		assert_eq!(event.origin_domain, 10066329);
		assert_eq!(event.block_number, 42);
		assert_eq!(event.log_index, 5);
		assert_eq!(event.resolved.open_deadline, None);
		assert_eq!(event.resolved.fill_deadline, 1_900_000_000);
		assert_eq!(event.resolved.max_spent[0].amount, U256::from(1000u64));
		assert_eq!(event.resolved.min_received[0].amount, U256::from(1100u64));
		// Byte chunking round-trips through the wire format.
		assert_eq!(
			event.resolved.fill_instructions[0].origin_data,
			origin_data
		);
		assert_eq!(
			event.resolved.fill_instructions[0].destination_chain_id,
			11155111
		);
	}

	#[test]
	fn truncated_payload_is_fatal() {
		let order_id = OrderId::from_bytes([7u8; 32]);
		let mut data = sample_payload(order_id, &[1, 2, 3]);
		data.truncate(8);
		let failure = source().normalize(&emitted(data, 42), 0).unwrap_err();
		assert!(failure.fatal);
		assert!(failure.reason.contains("truncated"));
	}

	#[test]
	fn zero_order_id_is_a_non_fatal_skip() {
		let data = sample_payload(OrderId::from_bytes([0u8; 32]), &[]);
		let failure = source().normalize(&emitted(data, 42), 0).unwrap_err();
		assert!(!failure.fatal);
		assert!(failure.reason.contains("zero order id"));
	}

	#[test]
	fn missing_block_number_is_a_non_fatal_skip() {
		let data = sample_payload(OrderId::from_bytes([7u8; 32]), &[]);
		let mut event = emitted(data, 42);
		event.block_number = None;
		let failure = source().normalize(&event, 0).unwrap_err();
		assert!(!failure.fatal);
	}

	#[test]
	fn window_aborts_on_fatal_event_but_survives_skips() {
		let source = source();
		let good = emitted(sample_payload(OrderId::from_bytes([7u8; 32]), &[1]), 42);
		let zero = emitted(sample_payload(OrderId::from_bytes([0u8; 32]), &[]), 43);
		let mut truncated_data = sample_payload(OrderId::from_bytes([8u8; 32]), &[1]);
		truncated_data.truncate(4);
		let truncated = emitted(truncated_data, 44);

		let outcome = source
			.normalize_events(&[good.clone(), zero.clone()])
			.unwrap();
		assert_eq!(outcome.events.len(), 1);
		assert_eq!(outcome.skipped, 1);

		assert!(matches!(
			source.normalize_events(&[good.clone(), truncated.clone()]),
			Err(ListenerError::Decode { block: 44, .. })
		));

		// The demotion knob turns the same window into a skip.
		let mut lenient = source;
		lenient.skip_malformed_events = true;
		let outcome = lenient.normalize_events(&[good, truncated]).unwrap();
		assert_eq!(outcome.events.len(), 1);
		assert_eq!(outcome.skipped, 1);
	}
}
