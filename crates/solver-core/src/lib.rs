//! Solver lifecycle: wiring, supervision, and shutdown.
//!
//! The manager turns a validated [`Config`] into a running solver: one
//! RPC client and one signer per chain (EVM signers scoped by chain id),
//! adapters registered by Hyperlane domain, one listener task per chain,
//! and a shared cursor store. On SIGINT or SIGTERM a broadcast stop
//! signal fans out; listeners finish their in-flight poll and persist
//! their cursor, and the manager joins them under a hard deadline.

use solver_account::{evm_signer, AccountError, FeltSigner};
use solver_adapters::implementations::evm::EvmAdapter;
use solver_adapters::implementations::starknet::StarknetAdapter;
use solver_adapters::{AdapterError, AdapterRegistry};
use solver_config::{Config, ConfigError};
use solver_listener::implementations::evm::EvmEventSource;
use solver_listener::implementations::starknet::FeltEventSource;
use solver_listener::{ChainListener, ListenerConfig, ListenerError, OpenEventHandler};
use solver_rules::RulesEngine;
use solver_storage::CursorStore;
use solver_types::VmFamily;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod processor;

pub use processor::{IntentProcessor, ProcessError};

/// How long shutdown waits for listeners to finish their in-flight poll
/// before abandoning them.
const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Top-level solver errors.
#[derive(Debug, Error)]
pub enum SolverError {
	/// Configuration is unusable; reported at startup, exit non-zero.
	#[error("configuration: {0}")]
	Config(#[from] ConfigError),
	/// Signer material is unusable.
	#[error("account: {0}")]
	Account(#[from] AccountError),
	/// An adapter could not be constructed.
	#[error("adapter: {0}")]
	Adapter(#[from] AdapterError),
	/// A listener could not be constructed or died.
	#[error("listener: {0}")]
	Listener(#[from] ListenerError),
}

/// Owns every long-lived component of a running solver.
pub struct SolverManager {
	config: Config,
	store: Arc<CursorStore>,
	processor: Arc<IntentProcessor>,
}

impl SolverManager {
	/// Builds clients, signers, adapters, and the processor from a
	/// validated configuration. No background work starts here.
	pub async fn build(config: Config) -> Result<Self, SolverError> {
		config.validate()?;

		let store = Arc::new(CursorStore::new(&config.state_file));
		let mut registry = AdapterRegistry::new();

		for chain in config.chains.values() {
			match chain.vm {
				VmFamily::Evm => {
					let key = config.evm_private_key.as_ref().ok_or_else(|| {
						ConfigError::MissingSigner(
							chain.name.clone(),
							"SOLVER_PRIVATE_KEY is not set".to_string(),
						)
					})?;
					let signer = evm_signer(key, chain.chain_id)?;
					registry.register(Arc::new(EvmAdapter::connect(chain, signer)?))?;
				}
				VmFamily::Starknet => {
					let triple = chain.starknet_signer.as_ref().ok_or_else(|| {
						ConfigError::MissingSigner(
							chain.name.clone(),
							"felt signer triple is incomplete".to_string(),
						)
					})?;
					let signer =
						FeltSigner::new(&triple.private_key, &triple.public_key, &triple.address)?;
					registry
						.register(Arc::new(StarknetAdapter::connect(chain, &signer).await?))?;
				}
			}
			tracing::info!(
				chain = %chain.name,
				domain = chain.domain,
				vm = %chain.vm,
				"registered adapter"
			);
		}

		let rules = RulesEngine::standard(&config);
		let processor = Arc::new(IntentProcessor::new(Arc::new(registry), rules));

		Ok(Self {
			config,
			store,
			processor,
		})
	}

	/// Spawns one listener per chain and runs until a shutdown signal.
	pub async fn run(&self) -> Result<(), SolverError> {
		let (stop_tx, _) = broadcast::channel(1);
		let mut tasks: Vec<(String, JoinHandle<Result<(), ListenerError>>)> = Vec::new();

		for chain in self.config.chains.values() {
			let listener_config = ListenerConfig::from(chain);
			let handler: Arc<dyn OpenEventHandler> = self.processor.clone();
			let store = self.store.clone();
			let stop_rx = stop_tx.subscribe();

			let handle = match chain.vm {
				VmFamily::Evm => {
					let source = EvmEventSource::connect(chain)?;
					tokio::spawn(
						ChainListener::new(listener_config, source, store, handler).run(stop_rx),
					)
				}
				VmFamily::Starknet => {
					let source = FeltEventSource::connect(chain)?;
					tokio::spawn(
						ChainListener::new(listener_config, source, store, handler).run(stop_rx),
					)
				}
			};
			tracing::info!(chain = %chain.name, "started listener");
			tasks.push((chain.name.clone(), handle));
		}

		wait_for_shutdown().await;
		tracing::info!("shutdown signal received, draining listeners");
		let _ = stop_tx.send(());

		let drain = async {
			for (chain, handle) in tasks {
				match handle.await {
					Ok(Ok(())) => {}
					Ok(Err(e)) => tracing::warn!(chain = %chain, error = %e, "listener error"),
					Err(e) => tracing::warn!(chain = %chain, error = %e, "listener panicked"),
				}
			}
		};
		if tokio::time::timeout(
			tokio::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
			drain,
		)
		.await
		.is_err()
		{
			tracing::warn!(
				grace_secs = SHUTDOWN_GRACE_SECS,
				"shutdown deadline hit, abandoning remaining listeners"
			);
		}

		tracing::info!("solver stopped");
		Ok(())
	}
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn wait_for_shutdown() {
	#[cfg(unix)]
	{
		let mut sigterm =
			match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
				Ok(signal) => signal,
				Err(e) => {
					tracing::warn!(error = %e, "cannot install SIGTERM handler");
					let _ = tokio::signal::ctrl_c().await;
					return;
				}
			};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {}
			_ = sigterm.recv() => {}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use solver_config::from_env_map;
	use std::collections::HashMap;

	#[tokio::test]
	async fn build_wires_evm_chains_without_network_io() {
		let dir = tempfile::tempdir().unwrap();
		let mut vars = HashMap::new();
		vars.insert(
			"LOCAL_RPC_URL".to_string(),
			"http://localhost:8545".to_string(),
		);
		vars.insert("LOCAL_CHAIN_ID".to_string(), "31337".to_string());
		vars.insert("LOCAL_DOMAIN_ID".to_string(), "31337".to_string());
		vars.insert(
			"LOCAL_HYPERLANE_ADDRESS".to_string(),
			"0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
		);
		vars.insert(
			"SOLVER_PRIVATE_KEY".to_string(),
			"0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
		);
		vars.insert(
			"SOLVER_STATE_FILE".to_string(),
			dir.path().join("state.json").to_string_lossy().to_string(),
		);

		let config = from_env_map(&vars).unwrap();
		let manager = SolverManager::build(config).await.unwrap();
		assert_eq!(manager.config.chains.len(), 1);
	}

	#[tokio::test]
	async fn build_rejects_bad_signer_material() {
		let mut vars = HashMap::new();
		vars.insert(
			"LOCAL_RPC_URL".to_string(),
			"http://localhost:8545".to_string(),
		);
		vars.insert("LOCAL_CHAIN_ID".to_string(), "31337".to_string());
		vars.insert("LOCAL_DOMAIN_ID".to_string(), "31337".to_string());
		vars.insert(
			"LOCAL_HYPERLANE_ADDRESS".to_string(),
			"0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
		);
		vars.insert("SOLVER_PRIVATE_KEY".to_string(), "garbage".to_string());

		let config = from_env_map(&vars).unwrap();
		assert!(matches!(
			SolverManager::build(config).await,
			Err(SolverError::Account(_))
		));
	}
}
