//! EVM `Open` event source.
//!
//! Fetches logs with an address + topic filter and decodes the ERC-7683
//! `Open(bytes32, ResolvedCrossChainOrder)` ABI tuple. `origin_data`
//! inside the fill instructions is preserved byte-for-byte.
//!
//! Decode failures are classified. Single-log anomalies (a zero order
//! id, a log without a block number) are non-fatal: counted and
//! skipped. Structural failures (the ABI tuple does not decode, a field
//! overflows, the spend and instruction arrays do not correspond) mean
//! the decoder disagrees with the contract and abort the window, unless
//! the chain is configured to skip malformed events.

use crate::{DecodeFailure, EventSource, FetchOutcome, ListenerError};
use alloy_primitives::{Address, Log as PrimLog, LogData};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::{Filter, Log};
use alloy_sol_types::{sol, SolEvent};
use alloy_transport_http::Http;
use async_trait::async_trait;
use solver_config::ChainConfig;
use solver_types::{
	FillInstruction, OpenEvent, OrderId, Output, ResolvedCrossChainOrder, UniversalAddress,
};

// Solidity type definitions matching the ERC-7683 event ABI.
sol! {
	/// A transfer leg of a resolved order.
	struct SolOutput {
		bytes32 token;
		uint256 amount;
		bytes32 recipient;
		uint256 chainId;
	}

	/// Routing for one fill leg; originData is opaque.
	struct SolFillInstruction {
		uint64 destinationChainId;
		bytes32 destinationSettler;
		bytes originData;
	}

	/// The resolved order emitted with every Open.
	struct SolResolvedCrossChainOrder {
		address user;
		uint256 originChainId;
		uint32 openDeadline;
		uint32 fillDeadline;
		bytes32 orderId;
		SolOutput[] maxSpent;
		SolOutput[] minReceived;
		SolFillInstruction[] fillInstructions;
	}

	/// Emitted when a user locks funds for a cross-chain order.
	event Open(bytes32 indexed orderId, SolResolvedCrossChainOrder resolvedOrder);
}

/// Event source for one EVM origin chain.
pub struct EvmEventSource {
	chain_name: String,
	/// Hyperlane domain of this origin chain.
	domain: u32,
	contract: Address,
	/// Demotes fatal decode failures to skips for this chain.
	skip_malformed_events: bool,
	provider: RootProvider<Http<reqwest::Client>>,
}

impl EvmEventSource {
	/// Builds a source for the given chain.
	pub fn connect(config: &ChainConfig) -> Result<Self, ListenerError> {
		let url = config
			.rpc_url
			.parse()
			.map_err(|e| ListenerError::Rpc(format!("invalid RPC URL: {}", e)))?;
		Ok(Self {
			chain_name: config.name.clone(),
			domain: config.domain,
			contract: config
				.hyperlane_address
				.to_evm()
				.map_err(|e| ListenerError::Rpc(e.to_string()))?,
			skip_malformed_events: config.skip_malformed_events,
			provider: RootProvider::new_http(url),
		})
	}

	fn normalize(&self, log: &Log) -> Result<OpenEvent, DecodeFailure> {
		let prim_log = PrimLog {
			address: log.address(),
			data: LogData::new_unchecked(log.topics().to_vec(), log.data().data.clone()),
		};
		// The filter already matched address and topic; a tuple that
		// does not decode means the ABI expectation itself is wrong.
		let open = Open::decode_log(&prim_log, true).map_err(|e| e.to_string())?;
		let block_number = log
			.block_number
			.ok_or_else(|| DecodeFailure::skip("log without block number"))?;

		let order_id = OrderId::from_bytes(open.orderId.0);
		if order_id.is_zero() {
			return Err(DecodeFailure::skip("zero order id"));
		}

		let resolved = &open.resolvedOrder;
		let origin_chain_id: u64 = resolved
			.originChainId
			.try_into()
			.map_err(|_| "originChainId exceeds u64".to_string())?;

		let map_outputs = |outputs: &[SolOutput]| -> Result<Vec<Output>, String> {
			outputs
				.iter()
				.map(|output| {
					Ok(Output {
						token: UniversalAddress::from_bytes(output.token.0),
						amount: output.amount,
						recipient: UniversalAddress::from_bytes(output.recipient.0),
						chain_id: output
							.chainId
							.try_into()
							.map_err(|_| "output chainId exceeds u64".to_string())?,
					})
				})
				.collect()
		};

		let event = OpenEvent {
			order_id,
			sender: UniversalAddress::from_evm(resolved.user),
			origin_chain: self.chain_name.clone(),
			origin_domain: self.domain,
			resolved: ResolvedCrossChainOrder {
				origin_chain_id,
				open_deadline: (resolved.openDeadline != 0).then_some(resolved.openDeadline),
				fill_deadline: resolved.fillDeadline,
				max_spent: map_outputs(&resolved.maxSpent)?,
				min_received: map_outputs(&resolved.minReceived)?,
				fill_instructions: resolved
					.fillInstructions
					.iter()
					.map(|instruction| FillInstruction {
						destination_chain_id: instruction.destinationChainId,
						destination_settler: UniversalAddress::from_bytes(
							instruction.destinationSettler.0,
						),
						origin_data: instruction.originData.to_vec(),
					})
					.collect(),
			},
			block_number,
			log_index: log.log_index.unwrap_or(0),
		};

		if !event.resolved.is_well_formed() {
			return Err(DecodeFailure::fatal(
				"max_spent and fill_instructions do not correspond",
			));
		}
		Ok(event)
	}

	fn normalize_logs(&self, logs: &[Log]) -> Result<FetchOutcome, ListenerError> {
		let mut outcome = FetchOutcome::default();
		for log in logs {
			match self.normalize(log) {
				Ok(event) => outcome.events.push(event),
				Err(failure) if failure.fatal && !self.skip_malformed_events => {
					return Err(ListenerError::Decode {
						block: log.block_number.unwrap_or(0),
						reason: failure.reason,
					});
				}
				Err(failure) => {
					tracing::warn!(
						chain = %self.chain_name,
						block = log.block_number.unwrap_or(0),
						phase = "listen",
						fatal = failure.fatal,
						reason = %failure.reason,
						"skipping undecodable log"
					);
					outcome.skipped += 1;
				}
			}
		}
		Ok(outcome)
	}
}

#[async_trait]
impl EventSource for EvmEventSource {
	async fn latest_block(&self) -> Result<u64, ListenerError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| ListenerError::Rpc(format!("eth_blockNumber failed: {}", e)))
	}

	async fn fetch_open_events(&self, from: u64, to: u64) -> Result<FetchOutcome, ListenerError> {
		let filter = Filter::new()
			.address(vec![self.contract])
			.event_signature(vec![Open::SIGNATURE_HASH])
			.from_block(from)
			.to_block(to);
		let logs = self
			.provider
			.get_logs(&filter)
			.await
			.map_err(|e| ListenerError::Rpc(format!("eth_getLogs failed: {}", e)))?;

		self.normalize_logs(&logs)
	}
}
