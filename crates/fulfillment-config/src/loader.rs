//! Configuration loader module for handling modular configuration files.
//!
//! This module provides functionality to load configuration from multiple
//! files and validates that sections are unique across files to prevent
//! merge conflicts.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Configuration loader that handles multi-file configurations with includes.
pub struct ConfigLoader {
	/// Base path for resolving relative includes
	base_path: PathBuf,
	/// Track loaded files to prevent circular includes
	loaded_files: HashSet<PathBuf>,
	/// Track which sections come from which files for error reporting
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	/// Creates a new ConfigLoader with the given base path.
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file and all its includes.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let config_path = self.resolve_path(config_path)?;

		// Load the main configuration file
		let main_content = self.load_file(&config_path).await?;
		let main_toml: toml::Value = toml::from_str(&main_content)?;

		// Check for includes
		let includes = self.extract_includes(&main_toml)?;

		// If no includes, just parse and return the main config
		if includes.is_empty() {
			let config: Config = toml::from_str(&main_content)?;
			return Ok(config);
		}

		// Build combined TOML with validation
		let combined_toml = self
			.load_and_combine(main_toml, includes, config_path.clone())
			.await?;

		// Convert to Config
		let config_str = toml::to_string(&combined_toml).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		let config: Config = toml::from_str(&config_str)?;

		Ok(config)
	}

	/// Loads a file and resolves environment variables.
	async fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		// Check for circular includes
		let canonical_path = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical_path.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical_path.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	/// Extracts include directives from the configuration.
	fn extract_includes(&self, toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
		let mut includes = Vec::new();

		if let Some(include_value) = toml.get("include") {
			if let Some(include_array) = include_value.as_array() {
				for item in include_array {
					if let Some(path_str) = item.as_str() {
						includes.push(PathBuf::from(path_str));
					} else {
						return Err(ConfigError::Validation(
							"Include array must contain only strings".into(),
						));
					}
				}
			} else if let Some(path_str) = include_value.as_str() {
				includes.push(PathBuf::from(path_str));
			} else {
				return Err(ConfigError::Validation(
					"Include must be a string or array of strings".into(),
				));
			}
		}

		Ok(includes)
	}

	/// Loads and combines configuration files with section uniqueness validation.
	async fn load_and_combine(
		&mut self,
		mut main_toml: toml::Value,
		includes: Vec<PathBuf>,
		main_file_path: PathBuf,
	) -> Result<toml::Value, ConfigError> {
		// Remove include directives from main config
		if let Some(table) = main_toml.as_table_mut() {
			table.remove("include");
		}

		// Track sections in main file
		if let Some(main_table) = main_toml.as_table() {
			for key in main_table.keys() {
				self.section_sources
					.insert(key.clone(), main_file_path.clone());
			}
		}

		// Load and validate each included file
		for include_path in includes {
			let resolved_path = self.resolve_path(&include_path)?;
			let include_content = self.load_file(&resolved_path).await?;
			let include_toml: toml::Value = toml::from_str(&include_content)?;

			// Validate no duplicate sections
			if let Some(include_table) = include_toml.as_table() {
				for key in include_table.keys() {
					if let Some(existing_source) = self.section_sources.get(key) {
						return Err(ConfigError::Validation(format!(
							"Duplicate section '{}' found in {} and {}. \
							Each top-level section must be unique across all configuration files.",
							key,
							existing_source.display(),
							resolved_path.display()
						)));
					}
					self.section_sources
						.insert(key.clone(), resolved_path.clone());
				}

				// Merge the tables
				if let Some(main_table) = main_toml.as_table_mut() {
					for (key, value) in include_table {
						main_table.insert(key.clone(), value.clone());
					}
				}
			}
		}

		Ok(main_toml)
	}

	/// Resolves a path relative to the base path.
	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();

		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		// Verify the file exists
		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}
