//! Transaction hash and receipt types.
//!
//! Adapters report submissions and confirmations in these VM-neutral
//! shapes; hashes stay raw bytes because the two VM families disagree on
//! both width conventions and display formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A submitted transaction's hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(&self.0))
	}
}

/// Confirmation outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// Hash of the confirmed transaction.
	pub hash: TransactionHash,
	/// Block it was included in.
	pub block_number: u64,
	/// Whether execution succeeded; a reverted fill or settle is
	/// surfaced, not retried.
	pub success: bool,
}
