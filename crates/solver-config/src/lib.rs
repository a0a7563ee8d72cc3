//! Configuration for the solver service.
//!
//! All configuration is read from flat environment variables so an
//! operator can redirect any single chain without a code change. A chain
//! named `X` is declared by `X_RPC_URL` plus its identity keys; global
//! keys carry signer material, the cursor-file path, and routing policy.
//!
//! A chain carries four identity keys that must not be conflated: its
//! configured name (routing), its VM-native chain id (RPC and signature
//! scope), its Hyperlane domain (order payloads), and the entry contract
//! address on that chain.

use serde::{Deserialize, Serialize};
use solver_types::{Secret, UniversalAddress, VmFamily};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub mod loader;

pub use loader::{from_env, from_env_map};

/// Default pacing between polls when `X_POLL_INTERVAL_MS` is absent.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
/// Default cap on a single log-fetch window.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 1_000;
/// Default confirmation depth subtracted from the RPC head.
pub const DEFAULT_CONFIRMATION_BLOCKS: u64 = 0;
/// Default cursor-file location when `SOLVER_STATE_FILE` is absent.
pub const DEFAULT_STATE_FILE: &str = "./solver-state.json";

/// Errors raised while loading or validating configuration.
///
/// Any of these is irrecoverable misconfiguration; the binary reports it
/// and exits non-zero.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	/// A required key for a declared chain is missing.
	#[error("missing environment variable {0}")]
	MissingKey(String),
	/// A key is present but cannot be parsed.
	#[error("invalid value for {key}: {reason}")]
	InvalidValue { key: String, reason: String },
	/// No `*_RPC_URL` key was found at all.
	#[error("no chains configured: set at least one <CHAIN>_RPC_URL")]
	NoChains,
	/// Two chains claim the same Hyperlane domain.
	#[error("chains {0} and {1} both claim hyperlane domain {2}")]
	DuplicateDomain(String, String, u32),
	/// A chain needs a signer that was not provided.
	#[error("no signer configured for chain {0}: {1}")]
	MissingSigner(String, String),
	/// An allow/block list entry is malformed.
	#[error("invalid routing policy entry '{0}': {1}")]
	InvalidPolicy(String, String),
}

/// Felt-VM signer triple for one chain.
#[derive(Debug, Clone)]
pub struct StarknetSignerConfig {
	/// Signing key, hex felt.
	pub private_key: Secret,
	/// Public key matching the signing key, hex felt.
	pub public_key: String,
	/// Deployed account contract address, hex felt.
	pub address: String,
}

/// Static metadata for one configured chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
	/// Routing name, the lower-cased env prefix.
	pub name: String,
	/// RPC endpoint.
	pub rpc_url: String,
	/// VM-native chain id.
	pub chain_id: u64,
	/// Hyperlane domain used inside order payloads. Not the chain id.
	pub domain: u32,
	/// Solver-side entry contract on this chain.
	pub hyperlane_address: UniversalAddress,
	/// Signed starting block: `> 0` absolute, `0` latest, `< 0` blocks
	/// before head.
	pub start_block: i64,
	/// Poll pacing in milliseconds.
	pub poll_interval_ms: u64,
	/// Upper bound on a single fetch window.
	pub max_block_range: u64,
	/// Blocks subtracted from head before indexing.
	pub confirmation_blocks: u64,
	/// When set, a structurally undecodable `Open` event is skipped
	/// instead of aborting its window. Off by default: a wire-format
	/// mismatch halts the chain rather than silently dropping orders.
	pub skip_malformed_events: bool,
	/// VM family, decided by which signer material the chain declares.
	pub vm: VmFamily,
	/// Present iff `vm == Starknet`.
	pub starknet_signer: Option<StarknetSignerConfig>,
}

/// One allow/block list entry. `None` fields are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePattern {
	/// Order sender on origin.
	pub sender: Option<UniversalAddress>,
	/// Destination Hyperlane domain.
	pub destination_domain: Option<u64>,
	/// Recipient of the first output.
	pub recipient: Option<UniversalAddress>,
}

impl RoutePattern {
	/// Parses a `sender:domain:recipient` triple with `*` wildcards.
	pub fn parse(entry: &str) -> Result<Self, ConfigError> {
		let parts: Vec<&str> = entry.split(':').collect();
		if parts.len() != 3 {
			return Err(ConfigError::InvalidPolicy(
				entry.to_string(),
				"expected sender:destination_domain:recipient".to_string(),
			));
		}
		let field = |s: &str| -> Result<Option<UniversalAddress>, ConfigError> {
			if s == "*" {
				Ok(None)
			} else {
				UniversalAddress::from_hex(s)
					.map(Some)
					.map_err(|e| ConfigError::InvalidPolicy(entry.to_string(), e.to_string()))
			}
		};
		let destination_domain = if parts[1] == "*" {
			None
		} else {
			Some(parts[1].parse::<u64>().map_err(|e| {
				ConfigError::InvalidPolicy(entry.to_string(), format!("bad domain: {}", e))
			})?)
		};
		Ok(Self {
			sender: field(parts[0])?,
			destination_domain,
			recipient: field(parts[2])?,
		})
	}

	/// True when the pattern matches the given route.
	pub fn matches(
		&self,
		sender: &UniversalAddress,
		destination_domain: u64,
		recipient: Option<&UniversalAddress>,
	) -> bool {
		if let Some(want) = &self.sender {
			if want != sender {
				return false;
			}
		}
		if let Some(want) = self.destination_domain {
			if want != destination_domain {
				return false;
			}
		}
		if let Some(want) = &self.recipient {
			match recipient {
				Some(got) if got == want => {}
				_ => return false,
			}
		}
		true
	}
}

/// Full solver configuration.
#[derive(Debug, Clone)]
pub struct Config {
	/// Configured chains keyed by routing name.
	pub chains: BTreeMap<String, ChainConfig>,
	/// Shared EVM signing key, required when any EVM chain is present.
	pub evm_private_key: Option<Secret>,
	/// Cursor-store path.
	pub state_file: PathBuf,
	/// Routes that are always rejected. Checked before the allow list.
	pub block_list: Vec<RoutePattern>,
	/// When non-empty, a route must match one entry to be accepted.
	pub allow_list: Vec<RoutePattern>,
}

impl Config {
	/// Looks up a chain by its Hyperlane domain.
	pub fn chain_by_domain(&self, domain: u32) -> Option<&ChainConfig> {
		self.chains.values().find(|c| c.domain == domain)
	}

	/// Cross-chain consistency checks run once at startup.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.chains.is_empty() {
			return Err(ConfigError::NoChains);
		}
		let mut seen: BTreeMap<u32, &str> = BTreeMap::new();
		for chain in self.chains.values() {
			if let Some(previous) = seen.insert(chain.domain, &chain.name) {
				return Err(ConfigError::DuplicateDomain(
					previous.to_string(),
					chain.name.clone(),
					chain.domain,
				));
			}
			match chain.vm {
				VmFamily::Evm => {
					if self.evm_private_key.is_none() {
						return Err(ConfigError::MissingSigner(
							chain.name.clone(),
							"SOLVER_PRIVATE_KEY is not set".to_string(),
						));
					}
				}
				VmFamily::Starknet => {
					if chain.starknet_signer.is_none() {
						return Err(ConfigError::MissingSigner(
							chain.name.clone(),
							"felt signer triple is incomplete".to_string(),
						));
					}
				}
			}
		}
		Ok(())
	}
}
