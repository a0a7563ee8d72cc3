//! Environment scanning and parsing.
//!
//! Chains are discovered by scanning for `*_RPC_URL` keys; the prefix
//! becomes the chain name. A chain that declares the felt signer triple
//! (`X_SOLVER_ADDRESS` and `X_SOLVER_PUBLIC_KEY`) is treated as felt-VM,
//! everything else as EVM.

use crate::{
	ChainConfig, Config, ConfigError, RoutePattern, StarknetSignerConfig, DEFAULT_CONFIRMATION_BLOCKS,
	DEFAULT_MAX_BLOCK_RANGE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STATE_FILE,
};
use solver_types::{Secret, UniversalAddress, VmFamily};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

const RPC_URL_SUFFIX: &str = "_RPC_URL";

/// Loads configuration from the process environment.
pub fn from_env() -> Result<Config, ConfigError> {
	let vars: HashMap<String, String> = std::env::vars().collect();
	from_env_map(&vars)
}

/// Loads configuration from an explicit key/value map.
///
/// The seam the tests use; `from_env` is a thin wrapper.
pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Config, ConfigError> {
	let mut chains = BTreeMap::new();

	let mut prefixes: Vec<&str> = vars
		.keys()
		.filter_map(|k| k.strip_suffix(RPC_URL_SUFFIX))
		.filter(|p| !p.is_empty())
		.collect();
	prefixes.sort_unstable();

	for prefix in prefixes {
		let chain = parse_chain(prefix, vars)?;
		chains.insert(chain.name.clone(), chain);
	}

	let config = Config {
		chains,
		evm_private_key: vars
			.get("SOLVER_PRIVATE_KEY")
			.map(|v| Secret::new(v.clone())),
		state_file: vars
			.get("SOLVER_STATE_FILE")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
		block_list: parse_policy(vars.get("SOLVER_BLOCK_LIST"))?,
		allow_list: parse_policy(vars.get("SOLVER_ALLOW_LIST"))?,
	};

	config.validate()?;
	Ok(config)
}

fn parse_chain(prefix: &str, vars: &HashMap<String, String>) -> Result<ChainConfig, ConfigError> {
	let key = |suffix: &str| format!("{}_{}", prefix, suffix);
	let required = |suffix: &str| -> Result<&String, ConfigError> {
		vars.get(&key(suffix))
			.ok_or_else(|| ConfigError::MissingKey(key(suffix)))
	};

	let rpc_url = required("RPC_URL")?.clone();
	let chain_id = parse_value::<u64>(&key("CHAIN_ID"), required("CHAIN_ID")?)?;
	let domain = parse_value::<u32>(&key("DOMAIN_ID"), required("DOMAIN_ID")?)?;
	let hyperlane_address = UniversalAddress::from_hex(required("HYPERLANE_ADDRESS")?).map_err(
		|e| ConfigError::InvalidValue {
			key: key("HYPERLANE_ADDRESS"),
			reason: e.to_string(),
		},
	)?;

	let start_block = match vars.get(&key("SOLVER_START_BLOCK")) {
		Some(raw) => parse_value::<i64>(&key("SOLVER_START_BLOCK"), raw)?,
		None => 0,
	};
	let poll_interval_ms = optional_value(vars, &key("POLL_INTERVAL_MS"), DEFAULT_POLL_INTERVAL_MS)?;
	let max_block_range = optional_value(vars, &key("MAX_BLOCK_RANGE"), DEFAULT_MAX_BLOCK_RANGE)?;
	let confirmation_blocks =
		optional_value(vars, &key("CONFIRMATION_BLOCKS"), DEFAULT_CONFIRMATION_BLOCKS)?;
	let skip_malformed_events = optional_value(vars, &key("SKIP_MALFORMED_EVENTS"), false)?;

	// The felt signer triple marks a felt-VM chain; EVM chains share the
	// global SOLVER_PRIVATE_KEY.
	let has_felt_address = vars.contains_key(&key("SOLVER_ADDRESS"));
	let has_felt_pubkey = vars.contains_key(&key("SOLVER_PUBLIC_KEY"));
	let (vm, starknet_signer) = if has_felt_address || has_felt_pubkey {
		let signer = StarknetSignerConfig {
			private_key: Secret::new(required("SOLVER_PRIVATE_KEY")?.clone()),
			public_key: required("SOLVER_PUBLIC_KEY")?.clone(),
			address: required("SOLVER_ADDRESS")?.clone(),
		};
		(VmFamily::Starknet, Some(signer))
	} else {
		(VmFamily::Evm, None)
	};

	if max_block_range == 0 {
		return Err(ConfigError::InvalidValue {
			key: key("MAX_BLOCK_RANGE"),
			reason: "must be at least 1".to_string(),
		});
	}

	Ok(ChainConfig {
		name: prefix.to_ascii_lowercase(),
		rpc_url,
		chain_id,
		domain,
		hyperlane_address,
		start_block,
		poll_interval_ms,
		max_block_range,
		confirmation_blocks,
		skip_malformed_events,
		vm,
		starknet_signer,
	})
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
	T::Err: std::fmt::Display,
{
	raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
		key: key.to_string(),
		reason: e.to_string(),
	})
}

fn optional_value<T: std::str::FromStr>(
	vars: &HashMap<String, String>,
	key: &str,
	default: T,
) -> Result<T, ConfigError>
where
	T::Err: std::fmt::Display,
{
	match vars.get(key) {
		Some(raw) => parse_value(key, raw),
		None => Ok(default),
	}
}

fn parse_policy(raw: Option<&String>) -> Result<Vec<RoutePattern>, ConfigError> {
	let Some(raw) = raw else {
		return Ok(Vec::new());
	};
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(RoutePattern::parse)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_vars() -> HashMap<String, String> {
		let mut vars = HashMap::new();
		vars.insert(
			"SEPOLIA_RPC_URL".to_string(),
			"http://localhost:8545".to_string(),
		);
		vars.insert("SEPOLIA_CHAIN_ID".to_string(), "11155111".to_string());
		vars.insert("SEPOLIA_DOMAIN_ID".to_string(), "11155111".to_string());
		vars.insert(
			"SEPOLIA_HYPERLANE_ADDRESS".to_string(),
			"0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
		);
		vars.insert("SOLVER_PRIVATE_KEY".to_string(), "0xabc123".to_string());
		vars
	}

	fn starknet_vars(vars: &mut HashMap<String, String>) {
		vars.insert(
			"STARKNET_RPC_URL".to_string(),
			"http://localhost:5050".to_string(),
		);
		vars.insert("STARKNET_CHAIN_ID".to_string(), "23448594291968334".to_string());
		vars.insert("STARKNET_DOMAIN_ID".to_string(), "10066329".to_string());
		vars.insert(
			"STARKNET_HYPERLANE_ADDRESS".to_string(),
			"0x0123abc".to_string(),
		);
		vars.insert("STARKNET_SOLVER_PRIVATE_KEY".to_string(), "0x1".to_string());
		vars.insert("STARKNET_SOLVER_PUBLIC_KEY".to_string(), "0x2".to_string());
		vars.insert("STARKNET_SOLVER_ADDRESS".to_string(), "0x3".to_string());
	}

	#[test]
	fn discovers_chains_by_rpc_url_suffix() {
		let mut vars = base_vars();
		starknet_vars(&mut vars);
		let config = from_env_map(&vars).unwrap();
		assert_eq!(config.chains.len(), 2);
		assert!(config.chains.contains_key("sepolia"));
		assert!(config.chains.contains_key("starknet"));
	}

	#[test]
	fn defaults_apply_when_optional_keys_absent() {
		let config = from_env_map(&base_vars()).unwrap();
		let chain = &config.chains["sepolia"];
		assert_eq!(chain.start_block, 0);
		assert_eq!(chain.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
		assert_eq!(chain.max_block_range, DEFAULT_MAX_BLOCK_RANGE);
		assert_eq!(chain.confirmation_blocks, DEFAULT_CONFIRMATION_BLOCKS);
		assert!(!chain.skip_malformed_events);
		assert_eq!(chain.vm, VmFamily::Evm);
	}

	#[test]
	fn malformed_event_skipping_is_opt_in_per_chain() {
		let mut vars = base_vars();
		vars.insert(
			"SEPOLIA_SKIP_MALFORMED_EVENTS".to_string(),
			"true".to_string(),
		);
		let config = from_env_map(&vars).unwrap();
		assert!(config.chains["sepolia"].skip_malformed_events);

		vars.insert(
			"SEPOLIA_SKIP_MALFORMED_EVENTS".to_string(),
			"yes".to_string(),
		);
		assert!(matches!(
			from_env_map(&vars),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn felt_signer_triple_marks_starknet_chain() {
		let mut vars = base_vars();
		starknet_vars(&mut vars);
		let config = from_env_map(&vars).unwrap();
		let chain = &config.chains["starknet"];
		assert_eq!(chain.vm, VmFamily::Starknet);
		assert!(chain.starknet_signer.is_some());
	}

	#[test]
	fn incomplete_felt_triple_is_fatal() {
		let mut vars = base_vars();
		starknet_vars(&mut vars);
		vars.remove("STARKNET_SOLVER_PUBLIC_KEY");
		// The address key alone still marks the chain felt-VM, so the
		// missing key is an error rather than a silent EVM fallback.
		assert!(matches!(
			from_env_map(&vars),
			Err(ConfigError::MissingKey(k)) if k == "STARKNET_SOLVER_PUBLIC_KEY"
		));
	}

	#[test]
	fn missing_chain_id_is_fatal() {
		let mut vars = base_vars();
		vars.remove("SEPOLIA_CHAIN_ID");
		assert_eq!(
			from_env_map(&vars).unwrap_err(),
			ConfigError::MissingKey("SEPOLIA_CHAIN_ID".to_string())
		);
	}

	#[test]
	fn missing_evm_signer_is_fatal() {
		let mut vars = base_vars();
		vars.remove("SOLVER_PRIVATE_KEY");
		assert!(matches!(
			from_env_map(&vars),
			Err(ConfigError::MissingSigner(_, _))
		));
	}

	#[test]
	fn duplicate_domains_are_fatal() {
		let mut vars = base_vars();
		starknet_vars(&mut vars);
		vars.insert("STARKNET_DOMAIN_ID".to_string(), "11155111".to_string());
		assert!(matches!(
			from_env_map(&vars),
			Err(ConfigError::DuplicateDomain(_, _, 11155111))
		));
	}

	#[test]
	fn chains_resolve_by_domain_not_chain_id() {
		let mut vars = base_vars();
		starknet_vars(&mut vars);
		let config = from_env_map(&vars).unwrap();
		assert_eq!(config.chain_by_domain(10066329).unwrap().name, "starknet");
		assert!(config.chain_by_domain(999).is_none());
	}

	#[test]
	fn negative_start_block_parses() {
		let mut vars = base_vars();
		vars.insert("SEPOLIA_SOLVER_START_BLOCK".to_string(), "-100".to_string());
		let config = from_env_map(&vars).unwrap();
		assert_eq!(config.chains["sepolia"].start_block, -100);
	}

	#[test]
	fn policy_lists_parse_with_wildcards() {
		let mut vars = base_vars();
		vars.insert(
			"SOLVER_BLOCK_LIST".to_string(),
			"0xdead:*:*, *:10066329:*".to_string(),
		);
		let config = from_env_map(&vars).unwrap();
		assert_eq!(config.block_list.len(), 2);
		assert_eq!(config.block_list[0].destination_domain, None);
		assert_eq!(config.block_list[1].destination_domain, Some(10066329));
	}

	#[test]
	fn route_pattern_matching() {
		let pattern = RoutePattern::parse("*:77:*").unwrap();
		let sender = UniversalAddress::from_hex("0x01").unwrap();
		assert!(pattern.matches(&sender, 77, None));
		assert!(!pattern.matches(&sender, 78, None));

		let exact = RoutePattern::parse("0x01:*:0x02").unwrap();
		let recipient = UniversalAddress::from_hex("0x02").unwrap();
		assert!(exact.matches(&sender, 5, Some(&recipient)));
		// A recipient-constrained pattern cannot match without one.
		assert!(!exact.matches(&sender, 5, None));
	}
}
