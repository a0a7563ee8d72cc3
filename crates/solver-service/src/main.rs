//! Entry point for the solver binary.
//!
//! All operational configuration comes from the environment (see the
//! `solver-config` crate for the per-chain key set); the command line
//! only carries local conveniences. Misconfiguration is reported and
//! exits non-zero before any background work starts.

use clap::Parser;
use solver_core::SolverManager;
use std::path::PathBuf;

/// Command-line arguments for the solver.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Cursor-store path; overrides SOLVER_STATE_FILE.
	#[arg(long)]
	state_file: Option<PathBuf>,

	/// Default log level when RUST_LOG is not set.
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt().with_env_filter(env_filter).with_target(true).init();

	let mut config = match solver_config::from_env() {
		Ok(config) => config,
		Err(e) => {
			tracing::error!(error = %e, "invalid configuration");
			std::process::exit(1);
		}
	};
	if let Some(state_file) = args.state_file {
		config.state_file = state_file;
	}
	tracing::info!(
		chains = config.chains.len(),
		state_file = %config.state_file.display(),
		"loaded configuration"
	);

	let manager = match SolverManager::build(config).await {
		Ok(manager) => manager,
		Err(e) => {
			tracing::error!(error = %e, "failed to build solver");
			std::process::exit(1);
		}
	};
	tracing::info!("starting solver");

	if let Err(e) = manager.run().await {
		tracing::error!(error = %e, "solver exited with error");
		std::process::exit(1);
	}
}
