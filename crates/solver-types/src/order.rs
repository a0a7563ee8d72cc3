//! Normalized order and event structures.
//!
//! Listeners decode VM-specific `Open` logs into the types defined here;
//! the processor, rules engine, and adapters never see a raw log. The
//! order-id codec also lives here: a 32-byte id is a pure function of the
//! order payload and must resolve identically on every VM, which on felt
//! VMs means the reverse-endian `(low, high)` u256 split.

use crate::{AddressError, UniversalAddress};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 32-byte order identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub [u8; 32]);

impl OrderId {
	/// Wraps raw bytes.
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Raw 32-byte view.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// Splits the id into felt-VM u256 halves.
	///
	/// `low` is the byte-reversed first half, `high` the byte-reversed
	/// second half, matching the protocol's `u256_reverse_endian`
	/// derivation. Status lookups on felt VMs only hit with this exact
	/// convention.
	pub fn u256_parts(&self) -> (u128, u128) {
		let mut low_bytes = [0u8; 16];
		let mut high_bytes = [0u8; 16];
		low_bytes.copy_from_slice(&self.0[..16]);
		high_bytes.copy_from_slice(&self.0[16..]);
		(
			u128::from_le_bytes(low_bytes),
			u128::from_le_bytes(high_bytes),
		)
	}

	/// Rebuilds an id from felt-VM u256 halves.
	pub fn from_u256_parts(low: u128, high: u128) -> Self {
		let mut bytes = [0u8; 32];
		bytes[..16].copy_from_slice(&low.to_le_bytes());
		bytes[16..].copy_from_slice(&high.to_le_bytes());
		Self(bytes)
	}

	/// True for the all-zero id, which no valid order carries.
	pub fn is_zero(&self) -> bool {
		self.0 == [0u8; 32]
	}

	/// Shortened form for log lines.
	pub fn short(&self) -> String {
		crate::truncate_id(&hex::encode(self.0))
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

/// A single leg of an order: a token amount owed to a recipient on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
	/// Token to transfer; the all-zero address means the native asset.
	pub token: UniversalAddress,
	/// Amount in the token's smallest unit.
	pub amount: U256,
	/// Recipient, encoded for the destination VM family.
	pub recipient: UniversalAddress,
	/// Chain the transfer happens on.
	pub chain_id: u64,
}

/// Instruction telling the solver where and how to fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillInstruction {
	/// Hyperlane domain of the destination chain. Routing key, not a
	/// VM chain id.
	pub destination_chain_id: u64,
	/// Entry contract to call `fill` on.
	pub destination_settler: UniversalAddress,
	/// Opaque payload forwarded verbatim to the destination contract.
	pub origin_data: Vec<u8>,
}

/// The resolved ERC-7683 order carried inside an `Open` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCrossChainOrder {
	/// VM chain id of the origin chain.
	pub origin_chain_id: u64,
	/// Deadline for opening, if the order carries one.
	pub open_deadline: Option<u32>,
	/// Unix deadline by which the fill must land on destination.
	pub fill_deadline: u32,
	/// What the solver must provide on destination, pairwise with
	/// `fill_instructions`.
	pub max_spent: Vec<Output>,
	/// What the solver receives on origin after settlement.
	pub min_received: Vec<Output>,
	/// Per-leg fill routing.
	pub fill_instructions: Vec<FillInstruction>,
}

impl ResolvedCrossChainOrder {
	/// Checks the pairwise correspondence between spends and
	/// instructions that every downstream component assumes.
	pub fn is_well_formed(&self) -> bool {
		!self.fill_instructions.is_empty() && self.max_spent.len() == self.fill_instructions.len()
	}
}

/// A normalized `Open` event, the unit of work handed to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenEvent {
	/// 32-byte order identifier.
	pub order_id: OrderId,
	/// Order creator on the origin chain.
	pub sender: UniversalAddress,
	/// Configured name of the origin chain.
	pub origin_chain: String,
	/// Hyperlane domain the origin contract registered the order under.
	pub origin_domain: u32,
	/// The resolved order payload.
	pub resolved: ResolvedCrossChainOrder,
	/// Origin block the event was emitted in.
	pub block_number: u64,
	/// Position within the block, for stable ordering.
	pub log_index: u64,
}

impl OpenEvent {
	/// Destination domain of the first (and for now only) fill leg.
	pub fn destination_domain(&self) -> Option<u64> {
		self.resolved
			.fill_instructions
			.first()
			.map(|fi| fi.destination_chain_id)
	}
}

const FILLED_WORD: [u8; 32] = ascii_word(b"FILLED");
const SETTLED_WORD: [u8; 32] = ascii_word(b"SETTLED");

const fn ascii_word(s: &[u8]) -> [u8; 32] {
	let mut word = [0u8; 32];
	let mut i = 0;
	while i < s.len() {
		word[i] = s[i];
		i += 1;
	}
	word
}

/// Destination-reported lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
	/// No record on the destination contract.
	Unknown,
	/// Filled, settlement message not yet dispatched.
	Filled,
	/// Filled and settled.
	Settled,
	/// A sentinel this build does not recognize. Must be surfaced, never
	/// folded into `Unknown`.
	Other([u8; 32]),
}

impl OrderStatus {
	/// Maps the EVM contract's bytes32 sentinel.
	pub fn from_evm_word(word: [u8; 32]) -> Self {
		if word == [0u8; 32] {
			OrderStatus::Unknown
		} else if word == FILLED_WORD {
			OrderStatus::Filled
		} else if word == SETTLED_WORD {
			OrderStatus::Settled
		} else {
			OrderStatus::Other(word)
		}
	}

	/// Maps the felt-VM contract's numeric sentinel.
	pub fn from_felt_value(value: u64) -> Self {
		match value {
			0 => OrderStatus::Unknown,
			1 => OrderStatus::Filled,
			2 => OrderStatus::Settled,
			other => {
				let mut word = [0u8; 32];
				word[24..].copy_from_slice(&other.to_be_bytes());
				OrderStatus::Other(word)
			}
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Unknown => write!(f, "unknown"),
			OrderStatus::Filled => write!(f, "filled"),
			OrderStatus::Settled => write!(f, "settled"),
			OrderStatus::Other(raw) => write!(f, "other(0x{})", hex::encode(raw)),
		}
	}
}

/// Outcome of an adapter `fill` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAction {
	/// The fill transaction landed; settle must follow.
	SubmittedNeedsSettle,
	/// The destination already reports `Filled`; settle must follow.
	AlreadyFilledNeedsSettle,
	/// The destination already reports `Settled`; nothing left to do.
	AlreadyComplete,
}

impl FillAction {
	/// True when the settle step still has to run.
	pub fn needs_settle(&self) -> bool {
		!matches!(self, FillAction::AlreadyComplete)
	}
}

/// Extracts the EVM address embedded in an output's token field, or
/// `None` for the native sentinel.
pub fn output_token_evm(
	output: &Output,
) -> Result<Option<alloy_primitives::Address>, AddressError> {
	if output.token.is_zero() {
		Ok(None)
	} else {
		output.token.to_evm().map(Some)
	}
}
