//! Signer construction for both VM families.
//!
//! EVM chains share one private key, parameterized per chain with the
//! chain id for replay protection. Felt-VM chains each carry a signer
//! triple (private key, public key, deployed account address); the
//! public key is cross-checked against the private key at startup so a
//! mispasted triple fails before any transaction is attempted.
//!
//! Signers are owned by exactly one adapter per chain and never shared
//! across chains.

use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use solver_types::Secret;
use starknet::core::types::Felt;
use starknet::signers::{LocalWallet, SigningKey};
use thiserror::Error;

/// Errors raised while building signers.
#[derive(Debug, Error)]
pub enum AccountError {
	/// A key could not be parsed.
	#[error("invalid key material: {0}")]
	InvalidKey(String),
	/// The declared felt public key does not match the private key.
	#[error("felt public key mismatch: declared {declared}, derived {derived}")]
	PublicKeyMismatch { declared: String, derived: String },
}

/// Builds an EVM signer scoped to one chain id.
pub fn evm_signer(key: &Secret, chain_id: u64) -> Result<PrivateKeySigner, AccountError> {
	let signer: PrivateKeySigner = key.with_exposed(|raw| {
		raw.parse()
			.map_err(|_| AccountError::InvalidKey("EVM private key".to_string()))
	})?;
	Ok(signer.with_chain_id(Some(chain_id)))
}

/// Felt-VM signer triple, validated.
#[derive(Debug, Clone)]
pub struct FeltSigner {
	signing_key: SigningKey,
	/// Deployed account contract the solver submits from.
	pub address: Felt,
	/// Public key matching the signing key.
	pub public_key: Felt,
}

impl FeltSigner {
	/// Parses and cross-checks a signer triple.
	pub fn new(
		private_key: &Secret,
		public_key: &str,
		address: &str,
	) -> Result<Self, AccountError> {
		let secret = private_key.with_exposed(|raw| {
			Felt::from_hex(raw)
				.map_err(|_| AccountError::InvalidKey("felt private key".to_string()))
		})?;
		let declared = Felt::from_hex(public_key)
			.map_err(|e| AccountError::InvalidKey(format!("felt public key: {}", e)))?;
		let address = Felt::from_hex(address)
			.map_err(|e| AccountError::InvalidKey(format!("felt account address: {}", e)))?;

		let signing_key = SigningKey::from_secret_scalar(secret);
		let derived = signing_key.verifying_key().scalar();
		if derived != declared {
			return Err(AccountError::PublicKeyMismatch {
				declared: format!("{:#x}", declared),
				derived: format!("{:#x}", derived),
			});
		}

		Ok(Self {
			signing_key,
			address,
			public_key: declared,
		})
	}

	/// Wallet handle for account execution.
	pub fn wallet(&self) -> LocalWallet {
		LocalWallet::from(self.signing_key.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn evm_signer_derives_expected_address() {
		// First default anvil key.
		let key = Secret::new(
			"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
		);
		let signer = evm_signer(&key, 11155111).unwrap();
		assert_eq!(
			format!("{:#x}", signer.address()),
			"0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
		);
		assert_eq!(signer.chain_id(), Some(11155111));
	}

	#[test]
	fn evm_signer_rejects_garbage() {
		let key = Secret::new("not-a-key".to_string());
		assert!(matches!(
			evm_signer(&key, 1),
			Err(AccountError::InvalidKey(_))
		));
	}

	#[test]
	fn felt_signer_accepts_matching_triple() {
		let secret = Felt::from(1234567_u64);
		let derived = SigningKey::from_secret_scalar(secret).verifying_key().scalar();
		let signer = FeltSigner::new(
			&Secret::new(format!("{:#x}", secret)),
			&format!("{:#x}", derived),
			"0x0123",
		)
		.unwrap();
		assert_eq!(signer.public_key, derived);
		assert_eq!(signer.address, Felt::from_hex("0x0123").unwrap());
	}

	#[test]
	fn felt_signer_rejects_mismatched_public_key() {
		let secret = Felt::from(1234567_u64);
		assert!(matches!(
			FeltSigner::new(
				&Secret::new(format!("{:#x}", secret)),
				"0x1",
				"0x0123",
			),
			Err(AccountError::PublicKeyMismatch { .. })
		));
	}
}
