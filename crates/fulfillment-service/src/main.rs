//! Main entry point for the fulfillment service.
//!
//! Wires configuration, the storage backend, and the fulfillment engine
//! together, then serves the HTTP API. Storage backends are pluggable
//! and selected by name from configuration.

use clap::Parser;
use fulfillment_config::Config;
use fulfillment_core::FulfillmentEngine;
use fulfillment_storage::{get_all_implementations, StorageService};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

mod server;

/// Command-line arguments for the fulfillment service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the fulfillment service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the storage backend and the engine
/// 5. Serves the HTTP API until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started fulfillment service");

	// Load configuration
	let config = Config::from_file(args.config.to_str().unwrap()).await?;
	tracing::info!("Loaded configuration [{}]", config.marketplace.id);

	// Build the engine over the configured storage backend
	let storage = build_storage(&config)?;
	let engine = Arc::new(FulfillmentEngine::new(
		config.clone(),
		Arc::new(StorageService::new(storage)),
	));

	// Stand-in notification dispatcher: log every engine event. A real
	// deployment replaces this subscriber with the notifier service.
	let mut events = engine.event_bus().subscribe();
	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			tracing::info!(event = ?event, "notification event");
		}
	});

	let api_config = config.api.clone().unwrap_or_default();
	if !api_config.enabled {
		tracing::warn!("API server disabled in configuration; nothing to serve");
		return Ok(());
	}

	server::start_server(api_config, engine).await?;

	tracing::info!("Stopped fulfillment service");
	Ok(())
}

/// Builds the primary storage backend named in configuration, after
/// validating its TOML section against the backend's schema.
fn build_storage(
	config: &Config,
) -> Result<Box<dyn fulfillment_storage::StorageInterface>, Box<dyn std::error::Error>> {
	let factories: HashMap<&str, fulfillment_storage::StorageFactory> =
		get_all_implementations().into_iter().collect();

	let primary = config.storage.primary.as_str();
	let factory = factories
		.get(primary)
		.ok_or_else(|| format!("Unknown storage implementation '{}'", primary))?;

	let section = config
		.storage
		.implementations
		.get(primary)
		.cloned()
		.unwrap_or_else(|| toml::Value::Table(Default::default()));

	let backend = factory(&section)?;
	backend
		.config_schema()
		.validate(&section)
		.map_err(|e| format!("Invalid [storage.implementations.{}]: {}", primary, e))?;

	tracing::info!("Using '{}' storage backend", primary);
	Ok(backend)
}
