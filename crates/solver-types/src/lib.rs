//! Common types for the cross-chain intent solver.
//!
//! This crate defines the protocol-neutral data model shared by every other
//! crate: the universal 32-byte address, the normalized `Open` event and
//! resolved order structures, the order-id codec used on felt VMs, and the
//! secret wrapper for signing material.

/// Universal 32-byte addresses bridging EVM and felt-VM identifier formats.
pub mod address;
/// Byte-level codecs shared by listeners and adapters (felt words, u256 splits).
pub mod codec;
/// Display helpers for hex strings and token amounts.
pub mod formatting;
/// Normalized order and event structures consumed by the processor.
pub mod order;
/// Zeroized wrapper for signer key material.
pub mod secret;
/// Transaction hash and receipt types returned by chain adapters.
pub mod tx;

pub use address::{AddressError, UniversalAddress, VmFamily};
pub use codec::{origin_data_to_words, u128_pair_to_u256, u256_to_u128_pair, words_to_origin_data, CodecError};
pub use formatting::{format_token_amount, with_0x_prefix, without_0x_prefix};
pub use order::{
	FillAction, FillInstruction, OpenEvent, OrderId, OrderStatus, Output, ResolvedCrossChainOrder,
};
pub use secret::Secret;
pub use tx::{TransactionHash, TransactionReceipt};

/// Shortens an order id or hash for log output.
///
/// Keeps the first eight hex characters followed by `..`.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Current unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
