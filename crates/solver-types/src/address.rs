//! Universal address handling across VM families.
//!
//! The solver routes orders between chains whose native address formats
//! differ: EVM chains use 20-byte addresses, felt-VM chains use field
//! elements of up to 32 bytes. `UniversalAddress` is the single neutral
//! representation used everywhere outside the chain adapters; every
//! conversion to or from a VM-native format is explicit and fails loudly
//! when a value cannot fit.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Felt values must stay below the Stark field bound. Anything with the
/// top byte at or above `0x08` exceeds 2^251 and cannot be a felt.
const FELT_HIGH_BYTE_LIMIT: u8 = 0x08;

/// Errors produced by address conversions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
	/// The value has non-zero bytes outside the low 20 bytes and cannot
	/// be an EVM address.
	#[error("value does not fit a 20-byte EVM address: {0}")]
	NotAnEvmAddress(String),
	/// The value exceeds the felt field bound.
	#[error("value exceeds the felt field bound: {0}")]
	NotAFelt(String),
	/// A hex string could not be parsed into 32 bytes.
	#[error("invalid address hex: {0}")]
	InvalidHex(String),
}

/// The VM family a chain belongs to, which decides how addresses and
/// calldata are encoded on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmFamily {
	/// EVM chains: 20-byte addresses, ABI-encoded calldata.
	Evm,
	/// Felt-VM chains: field-element addresses, felt-array calldata.
	Starknet,
}

impl fmt::Display for VmFamily {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			VmFamily::Evm => write!(f, "evm"),
			VmFamily::Starknet => write!(f, "starknet"),
		}
	}
}

/// Neutral 32-byte chain-agnostic identifier.
///
/// EVM addresses embed in the low 20 bytes, left-padded with zeros.
/// Felt-style identifiers occupy the full width but must stay below the
/// field bound. The all-zero value denotes the chain's native asset when
/// used as a token reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniversalAddress([u8; 32]);

impl UniversalAddress {
	/// The all-zero address, used as the native-token sentinel.
	pub const ZERO: UniversalAddress = UniversalAddress([0u8; 32]);

	/// Wraps raw 32 bytes without interpretation.
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Embeds a 20-byte EVM address in the low bytes.
	pub fn from_evm(address: alloy_primitives::Address) -> Self {
		let mut bytes = [0u8; 32];
		bytes[12..].copy_from_slice(address.as_slice());
		Self(bytes)
	}

	/// Accepts a felt-VM identifier, rejecting values outside the field.
	pub fn from_felt_bytes(bytes: [u8; 32]) -> Result<Self, AddressError> {
		if bytes[0] >= FELT_HIGH_BYTE_LIMIT {
			return Err(AddressError::NotAFelt(hex::encode(bytes)));
		}
		Ok(Self(bytes))
	}

	/// Parses a 0x-prefixed or bare hex string of at most 32 bytes,
	/// left-padding shorter values.
	pub fn from_hex(s: &str) -> Result<Self, AddressError> {
		let stripped = crate::formatting::without_0x_prefix(s);
		// Odd-length hex is common for felt addresses; pad a leading zero.
		let padded;
		let hex_str = if stripped.len() % 2 == 1 {
			padded = format!("0{}", stripped);
			&padded
		} else {
			stripped
		};
		let raw = hex::decode(hex_str).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
		if raw.len() > 32 {
			return Err(AddressError::InvalidHex(format!(
				"{} bytes exceeds 32",
				raw.len()
			)));
		}
		let mut bytes = [0u8; 32];
		bytes[32 - raw.len()..].copy_from_slice(&raw);
		Ok(Self(bytes))
	}

	/// Extracts the embedded EVM address.
	///
	/// Fails if any of the high 12 bytes is non-zero, which would mean
	/// the value was never an EVM address to begin with.
	pub fn to_evm(&self) -> Result<alloy_primitives::Address, AddressError> {
		if self.0[..12].iter().any(|b| *b != 0) {
			return Err(AddressError::NotAnEvmAddress(hex::encode(self.0)));
		}
		Ok(alloy_primitives::Address::from_slice(&self.0[12..]))
	}

	/// Returns the value as big-endian felt bytes.
	///
	/// Fails for values at or above the field bound so that an oversized
	/// identifier is never silently truncated into a valid felt.
	pub fn to_felt_bytes(&self) -> Result<[u8; 32], AddressError> {
		if self.0[0] >= FELT_HIGH_BYTE_LIMIT {
			return Err(AddressError::NotAFelt(hex::encode(self.0)));
		}
		Ok(self.0)
	}

	/// Raw 32-byte view.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// True for the all-zero (native token) value.
	pub fn is_zero(&self) -> bool {
		self.0 == [0u8; 32]
	}
}

impl fmt::Display for UniversalAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl From<[u8; 32]> for UniversalAddress {
	fn from(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}
}

impl Serialize for UniversalAddress {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for UniversalAddress {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		UniversalAddress::from_hex(&s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;

	#[test]
	fn evm_round_trip_is_identity() {
		let original = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
		let univ = UniversalAddress::from_evm(original);
		assert!(univ.as_bytes()[..12].iter().all(|b| *b == 0));
		assert_eq!(univ.to_evm().unwrap(), original);
	}

	#[test]
	fn high_bytes_reject_evm_extraction() {
		let mut bytes = [0u8; 32];
		bytes[4] = 0x01;
		let univ = UniversalAddress::from_bytes(bytes);
		assert!(matches!(
			univ.to_evm(),
			Err(AddressError::NotAnEvmAddress(_))
		));
	}

	#[test]
	fn felt_round_trip_is_identity() {
		let mut bytes = [0u8; 32];
		bytes[0] = 0x04; // just below 2^251
		bytes[31] = 0xff;
		let univ = UniversalAddress::from_felt_bytes(bytes).unwrap();
		assert_eq!(univ.to_felt_bytes().unwrap(), bytes);
	}

	#[test]
	fn oversized_felt_rejected_both_ways() {
		let mut bytes = [0u8; 32];
		bytes[0] = 0x08;
		assert!(UniversalAddress::from_felt_bytes(bytes).is_err());
		assert!(UniversalAddress::from_bytes(bytes).to_felt_bytes().is_err());
	}

	#[test]
	fn hex_parse_left_pads() {
		let univ = UniversalAddress::from_hex("0xabc").unwrap();
		assert_eq!(univ.as_bytes()[31], 0xbc);
		assert_eq!(univ.as_bytes()[30], 0x0a);
		assert!(univ.as_bytes()[..30].iter().all(|b| *b == 0));
	}

	#[test]
	fn zero_is_native_sentinel() {
		assert!(UniversalAddress::ZERO.is_zero());
		assert!(!UniversalAddress::from_hex("0x01").unwrap().is_zero());
	}
}
