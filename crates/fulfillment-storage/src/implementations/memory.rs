//! In-memory storage backend for the fulfillment engine.
//!
//! This module provides a memory-based implementation of the
//! StorageInterface trait, used in tests and single-node development
//! runs where persistence across restarts is not required.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fulfillment_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored record: its version and payload.
#[derive(Debug, Clone)]
struct Entry {
	version: u64,
	bytes: Vec<u8>,
}

/// In-memory storage implementation.
///
/// Records live in a HashMap behind a read-write lock. The version check
/// and the write of compare_and_swap happen under a single write-lock
/// acquisition, so the CAS is atomic with respect to other writers.
pub struct MemoryStorage {
	store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<(Vec<u8>, u64), StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.map(|entry| (entry.bytes.clone(), entry.version))
			.ok_or(StorageError::NotFound)
	}

	async fn insert_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		if store.contains_key(key) {
			return Err(StorageError::AlreadyExists);
		}
		store.insert(
			key.to_string(),
			Entry {
				version: 1,
				bytes: value,
			},
		);
		Ok(1)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		value: Vec<u8>,
		expected_version: u64,
	) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		let entry = store.get_mut(key).ok_or(StorageError::NotFound)?;
		if entry.version != expected_version {
			return Err(StorageError::VersionConflict {
				expected: expected_version,
				actual: entry.version,
			});
		}
		entry.version += 1;
		entry.bytes = value;
		Ok(entry.version)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// Memory storage has no required configuration
		let schema = Schema::new(vec![], vec![]);
		schema.validate(config)
	}
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_storage(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	Ok(Box::new(MemoryStorage::new()))
}
