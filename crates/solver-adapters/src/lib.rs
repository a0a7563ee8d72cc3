//! Chain adapters: fill, settle, and status lookups per VM family.
//!
//! An adapter owns everything VM-specific about one destination chain:
//! its RPC client, its signer, and the encoding of fill/settle calldata.
//! The rest of the solver talks to adapters only through
//! [`AdapterInterface`] and addresses them by Hyperlane domain through
//! [`AdapterRegistry`]. Each adapter serializes its own transaction
//! submissions with an internal mutex so a signer never has more than
//! one in-flight nonce.

use alloy_primitives::U256;
use async_trait::async_trait;
use solver_types::{
	AddressError, CodecError, FillAction, OpenEvent, OrderId, OrderStatus, TransactionReceipt,
	UniversalAddress,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod starknet;
}

/// How long a single transaction may stay unconfirmed before the
/// adapter gives up on the receipt wait.
pub const RECEIPT_TIMEOUT_SECS: u64 = 300;

/// Errors surfaced by chain adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
	/// Transport failure talking to the chain.
	#[error("network: {0}")]
	Network(String),
	/// A submitted transaction reverted on chain.
	#[error("{phase} reverted in tx {tx_hash}: {reason}")]
	Reverted {
		phase: &'static str,
		tx_hash: String,
		reason: String,
	},
	/// The destination reported a status that forbids the requested
	/// operation, including sentinels this build does not recognize.
	#[error("order {order_id} has unexpected status {status}")]
	UnexpectedStatus { order_id: String, status: String },
	/// A receipt did not arrive within the adapter's wait window.
	#[error("timed out waiting for tx {0}")]
	ReceiptTimeout(String),
	/// The order payload cannot be executed on this VM.
	#[error("malformed order: {0}")]
	MalformedOrder(String),
	/// Address translation failed.
	#[error(transparent)]
	Address(#[from] AddressError),
	/// Felt-word encoding failed.
	#[error(transparent)]
	Codec(#[from] CodecError),
}

/// The capability set every destination chain must provide.
///
/// `fill` and `settle` are idempotent with respect to on-chain state:
/// they re-derive what remains to be done from `order_status` on every
/// call, so a crashed or re-delivered event is re-driven from whichever
/// step the contract reports.
#[async_trait]
pub trait AdapterInterface: Send + Sync {
	/// Configured name of the chain this adapter serves.
	fn chain_name(&self) -> &str;

	/// Hyperlane domain this adapter is registered under.
	fn domain(&self) -> u32;

	/// Delivers the destination side of an order.
	///
	/// Short-circuits on already-filled or already-settled orders and
	/// performs exact-amount ERC-20 approvals on the way when the
	/// destination contract's allowance is short.
	async fn fill(&self, event: &OpenEvent) -> Result<FillAction, AdapterError>;

	/// Dispatches the settlement message for a filled order.
	///
	/// Hard-errors unless the destination reports `Filled`; paying the
	/// message fee twice or for someone else's fill is never acceptable.
	async fn settle(&self, event: &OpenEvent) -> Result<TransactionReceipt, AdapterError>;

	/// Reads the destination contract's status record for an order.
	async fn order_status(&self, order_id: &OrderId) -> Result<OrderStatus, AdapterError>;

	/// Solver balance of a token on this chain; the zero address means
	/// the native asset.
	async fn balance_of(&self, token: &UniversalAddress) -> Result<U256, AdapterError>;

	/// Decimals of a token on this chain, cached after the first read.
	/// The native asset reports 18 on both supported families.
	async fn token_decimals(&self, token: &UniversalAddress) -> Result<u8, AdapterError>;
}

/// Domain-keyed table of adapters.
#[derive(Default)]
pub struct AdapterRegistry {
	adapters: HashMap<u32, Arc<dyn AdapterInterface>>,
}

impl AdapterRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an adapter under its own domain.
	///
	/// Registering two adapters for one domain is a wiring bug and
	/// panics in debug builds only through the returned error.
	pub fn register(&mut self, adapter: Arc<dyn AdapterInterface>) -> Result<(), AdapterError> {
		let domain = adapter.domain();
		if self.adapters.contains_key(&domain) {
			return Err(AdapterError::MalformedOrder(format!(
				"two adapters registered for domain {}",
				domain
			)));
		}
		self.adapters.insert(domain, adapter);
		Ok(())
	}

	/// Looks up the adapter for a destination domain as carried in an
	/// order payload.
	pub fn by_domain(&self, domain: u64) -> Option<Arc<dyn AdapterInterface>> {
		let domain: u32 = domain.try_into().ok()?;
		self.adapters.get(&domain).cloned()
	}

	/// Number of registered adapters.
	pub fn len(&self) -> usize {
		self.adapters.len()
	}

	/// True when nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.adapters.is_empty()
	}
}
