//! Storage module for the fulfillment engine.
//!
//! This module provides abstractions for persisting order state. Every
//! record carries a version that increases by one on each successful
//! write; writers commit through compare-and-swap against the version
//! they read, which is what gives the state machine its optimistic
//! concurrency control.

use async_trait::async_trait;
use fulfillment_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// A requested record does not exist.
	#[error("Not found")]
	NotFound,
	/// A record already exists where an insert expected none.
	#[error("Already exists")]
	AlreadyExists,
	/// The record's version no longer matches the one the writer read;
	/// a concurrent write committed first.
	#[error("Version conflict: expected {expected}, found {actual}")]
	VersionConflict { expected: u64, actual: u64 },
	/// Serialization or deserialization failed.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The storage backend failed.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Backend configuration was invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for storage backends.
///
/// Backends store opaque bytes per key alongside a record version.
/// Versions start at 1 on insert and increase by exactly one per
/// successful compare-and-swap.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves the raw bytes and current version for the given key.
	async fn get_bytes(&self, key: &str) -> Result<(Vec<u8>, u64), StorageError>;

	/// Creates a new record. Fails with [`StorageError::AlreadyExists`]
	/// if the key is present. Returns the initial version.
	async fn insert_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError>;

	/// Replaces the record if and only if its current version equals
	/// `expected_version`. Returns the new version on success, and
	/// [`StorageError::VersionConflict`] if another writer got there
	/// first. The check and the write are a single atomic step.
	async fn compare_and_swap(
		&self,
		key: &str,
		value: Vec<u8>,
		expected_version: u64,
	) -> Result<u64, StorageError>;

	/// Deletes the record for the given key, if any.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks whether a key exists.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
///
/// Every storage implementation provides a factory with this signature
/// so the service can build it from its TOML section.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns (name, factory) tuples for every available backend; used by
/// the service to wire the one named in configuration.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// High-level storage service providing typed, versioned operations.
///
/// Wraps a backend and handles JSON serialization plus the
/// namespace:id key scheme.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Retrieves and deserializes a record along with its version.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<(T, u64), StorageError> {
		let (bytes, version) = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		let value = serde_json::from_slice(&bytes)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;
		Ok((value, version))
	}

	/// Creates a new record; fails if one already exists under this id.
	pub async fn insert<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.insert_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Commits an update conditioned on the version the caller read.
	/// Returns the new version.
	pub async fn update_versioned<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		expected_version: u64,
	) -> Result<u64, StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.compare_and_swap(&Self::key(namespace, id), bytes, expected_version)
			.await
	}

	/// Checks whether a record exists.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Removes a record.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}
}
