//! Durable per-chain cursor storage.
//!
//! The cursor store is the solver's only persistent state: one JSON file
//! recording, per (chain, contract), the last block whose events were
//! fully handed to the processor. Writes go through a temp file and an
//! atomic rename so a crash can never leave a torn document, and `set`
//! rejects regressions so the on-disk cursor is monotonic per key.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use solver_types::UniversalAddress;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

/// Errors from cursor persistence.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Filesystem failure reading or writing the state file.
	#[error("state file i/o: {0}")]
	Io(#[from] std::io::Error),
	/// The state file exists but does not parse.
	#[error("state file corrupt: {0}")]
	Corrupt(#[from] serde_json::Error),
	/// A `set` tried to move a cursor backwards without `reset`.
	#[error("cursor for {chain} would regress from {current} to {requested}")]
	NonMonotonic {
		chain: String,
		current: u64,
		requested: u64,
	},
}

/// On-disk record for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetworkRecord {
	#[serde(rename = "chainId")]
	chain_id: u64,
	#[serde(rename = "hyperlaneAddress")]
	hyperlane_address: String,
	#[serde(rename = "lastIndexedBlock")]
	last_indexed_block: u64,
	#[serde(rename = "lastUpdated")]
	last_updated: String,
}

/// On-disk document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
	networks: BTreeMap<String, NetworkRecord>,
}

/// Identity of one cursor key.
///
/// The contract address is part of the key: if the entry contract for a
/// chain is redeployed, the old cursor must not be reused.
#[derive(Debug, Clone)]
pub struct CursorKey {
	/// Configured chain name.
	pub chain: String,
	/// VM-native chain id, recorded for operators.
	pub chain_id: u64,
	/// Entry contract the cursor belongs to.
	pub contract: UniversalAddress,
}

/// JSON-file cursor store with a single writer.
pub struct CursorStore {
	path: PathBuf,
	// One solver instance is the only writer; a store-wide mutex is
	// enough to serialize read-modify-write cycles.
	lock: Mutex<()>,
}

impl CursorStore {
	/// Opens a store at the given path. The file is created lazily on
	/// the first write.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	/// Returns the persisted cursor for a key, if any.
	///
	/// A record whose contract no longer matches the configured one is
	/// treated as absent so a redeployed contract starts fresh.
	pub async fn get(&self, key: &CursorKey) -> Result<Option<u64>, StorageError> {
		let _guard = self.lock.lock().await;
		let state = read_state(&self.path).await?;
		Ok(state
			.networks
			.get(&key.chain)
			.filter(|record| record.hyperlane_address == key.contract.to_string())
			.map(|record| record.last_indexed_block))
	}

	/// Persists a cursor, enforcing monotonicity per key.
	pub async fn set(&self, key: &CursorKey, block: u64) -> Result<(), StorageError> {
		let _guard = self.lock.lock().await;
		let mut state = read_state(&self.path).await?;
		if let Some(record) = state.networks.get(&key.chain) {
			if record.hyperlane_address == key.contract.to_string()
				&& record.last_indexed_block > block
			{
				return Err(StorageError::NonMonotonic {
					chain: key.chain.clone(),
					current: record.last_indexed_block,
					requested: block,
				});
			}
		}
		state.networks.insert(key.chain.clone(), record_for(key, block));
		write_state(&self.path, &state).await
	}

	/// Persists a cursor unconditionally, allowing regressions.
	pub async fn reset(&self, key: &CursorKey, block: u64) -> Result<(), StorageError> {
		let _guard = self.lock.lock().await;
		let mut state = read_state(&self.path).await?;
		state.networks.insert(key.chain.clone(), record_for(key, block));
		write_state(&self.path, &state).await
	}

	/// Writes an initial cursor only when the key has none.
	///
	/// Returns the cursor that is now in effect, so a restart lands on
	/// the persisted value rather than re-resolving the configuration.
	pub async fn init_if_absent(&self, key: &CursorKey, block: u64) -> Result<u64, StorageError> {
		let _guard = self.lock.lock().await;
		let mut state = read_state(&self.path).await?;
		if let Some(record) = state.networks.get(&key.chain) {
			if record.hyperlane_address == key.contract.to_string() {
				return Ok(record.last_indexed_block);
			}
		}
		state.networks.insert(key.chain.clone(), record_for(key, block));
		write_state(&self.path, &state).await?;
		Ok(block)
	}
}

fn record_for(key: &CursorKey, block: u64) -> NetworkRecord {
	NetworkRecord {
		chain_id: key.chain_id,
		hyperlane_address: key.contract.to_string(),
		last_indexed_block: block,
		last_updated: Utc::now().to_rfc3339(),
	}
}

async fn read_state(path: &Path) -> Result<StateFile, StorageError> {
	match fs::read(path).await {
		Ok(data) => Ok(serde_json::from_slice(&data)?),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
		Err(e) => Err(e.into()),
	}
}

async fn write_state(path: &Path, state: &StateFile) -> Result<(), StorageError> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent).await?;
		}
	}
	let temp_path = path.with_extension("tmp");
	fs::write(&temp_path, serde_json::to_vec_pretty(state)?).await?;
	fs::rename(&temp_path, path).await?;
	Ok(())
}
