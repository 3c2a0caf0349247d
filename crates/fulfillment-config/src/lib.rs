//! Configuration module for the fulfillment engine.
//!
//! This module provides structures and utilities for managing engine
//! configuration. It supports loading configuration from TOML files and
//! validates that all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the fulfillment engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to this marketplace instance.
	pub marketplace: MarketplaceConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// City-to-fee table for the delivery-fee lookup at checkout.
	pub delivery: DeliveryConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to the marketplace instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketplaceConfig {
	/// Unique identifier for this deployment, used in logs.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Delivery-fee configuration.
///
/// The delivery fee is resolved from the customer's city at checkout.
/// Fees are written as decimal strings in TOML (`"15"`, `"12.50"`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Fee applied when the city has no explicit entry. When absent,
	/// orders from unlisted cities are rejected at checkout.
	#[serde(default)]
	pub default_fee: Option<Decimal>,
	/// Per-city fees, keyed by the city identifier the caller supplies.
	#[serde(default)]
	pub city_fees: HashMap<String, Decimal>,
}

impl DeliveryConfig {
	/// Resolves the delivery fee for a city, falling back to the
	/// default fee if one is configured.
	pub fn fee_for(&self, city: &str) -> Option<Decimal> {
		self.city_fees.get(city).copied().or(self.default_fee)
	}
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			host: default_api_host(),
			port: default_api_port(),
		}
	}
}

/// Returns the default API host (localhost).
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	3000
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	// Limit input size to prevent ReDoS attacks
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = cap.get(0).unwrap();
		let var_name = cap.get(1).unwrap().as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => {
				if let Some(default) = default_value {
					default.to_string()
				} else {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file.
	///
	/// Supports modular configuration through include directives:
	/// `include = ["file1.toml", "file2.toml"]`. Each top-level section
	/// must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		let config = loader.load_config(file_name).await?;
		config.validate()?;
		Ok(config)
	}

	/// Parses configuration from a TOML string and validates it.
	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		let resolved = resolve_env_vars(content)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}

	/// Validates the configuration to ensure all required fields are
	/// properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.marketplace.id.is_empty() {
			return Err(ConfigError::Validation(
				"Marketplace ID cannot be empty".into(),
			));
		}

		// Validate storage config
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		// Validate delivery fees
		for (city, fee) in &self.delivery.city_fees {
			if fee.is_sign_negative() {
				return Err(ConfigError::Validation(format!(
					"Delivery fee for city '{}' cannot be negative",
					city
				)));
			}
		}
		if let Some(default_fee) = self.delivery.default_fee {
			if default_fee.is_sign_negative() {
				return Err(ConfigError::Validation(
					"Default delivery fee cannot be negative".into(),
				));
			}
		}

		Ok(())
	}
}
