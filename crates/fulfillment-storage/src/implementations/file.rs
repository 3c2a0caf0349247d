//! File-based storage backend for the fulfillment engine.
//!
//! Stores each record as one binary file: a fixed-size header carrying
//! the record version, followed by the JSON payload. Writes go to a
//! temporary file and are renamed into place; a store-wide mutex
//! serializes read-modify-write sequences so the version check inside
//! compare_and_swap cannot race another writer in this process.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fulfillment_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header carrying the record version.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "CLFS"
/// - [4-5]: Format version (u16, little-endian)
/// - [6-13]: Record version (u64, little-endian, starts at 1)
/// - [14-63]: Reserved/padding for future use
#[derive(Debug, Clone)]
struct FileHeader {
	magic: [u8; 4],
	format_version: u16,
	record_version: u64,
	padding: [u8; 50],
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"CLFS";
	const FORMAT_VERSION: u16 = 1;
	const SIZE: usize = 64;

	/// Creates a header for the given record version.
	fn new(record_version: u64) -> Self {
		Self {
			magic: *Self::MAGIC,
			format_version: Self::FORMAT_VERSION,
			record_version,
			padding: [0; 50],
		}
	}

	/// Serializes the header to bytes.
	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(&self.magic);
		bytes[4..6].copy_from_slice(&self.format_version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.record_version.to_le_bytes());
		bytes[14..64].copy_from_slice(&self.padding);
		bytes
	}

	/// Deserializes a header from bytes.
	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}

		let mut magic = [0u8; 4];
		magic.copy_from_slice(&bytes[0..4]);
		if magic != *Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if format_version > Self::FORMAT_VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				format_version
			)));
		}

		let mut version_bytes = [0u8; 8];
		version_bytes.copy_from_slice(&bytes[6..14]);
		let record_version = u64::from_le_bytes(version_bytes);

		let mut padding = [0u8; 50];
		padding.copy_from_slice(&bytes[14..64]);

		Ok(Self {
			magic,
			format_version,
			record_version,
			padding,
		})
	}
}

/// File-based storage implementation.
///
/// One file per record under the configured base path. Orders are
/// retained for audit and never expire, so the backend has no cleanup
/// concept.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes read-modify-write sequences across writers.
	write_lock: Mutex<()>,
}

impl FileStorage {
	/// Creates a new FileStorage instance rooted at the given path.
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		// Sanitize key to be filesystem-safe
		let safe_key = key.replace(['/', ':'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}

	/// Reads a record file, returning its header and payload.
	async fn read_record(&self, key: &str) -> Result<(FileHeader, Vec<u8>), StorageError> {
		let path = self.get_file_path(key);

		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let header = FileHeader::deserialize(&data)?;
		let payload = if data.len() > FileHeader::SIZE {
			data[FileHeader::SIZE..].to_vec()
		} else {
			Vec::new()
		};
		Ok((header, payload))
	}

	/// Writes header + payload to a temp file, then renames into place.
	async fn write_record(
		&self,
		key: &str,
		record_version: u64,
		value: &[u8],
	) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let header = FileHeader::new(record_version);
		let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
		file_data.extend_from_slice(&header.serialize());
		file_data.extend_from_slice(value);

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, file_data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<(Vec<u8>, u64), StorageError> {
		let (header, payload) = self.read_record(key).await?;
		Ok((payload, header.record_version))
	}

	async fn insert_bytes(&self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
		let _guard = self.write_lock.lock().await;

		if self.get_file_path(key).exists() {
			return Err(StorageError::AlreadyExists);
		}
		self.write_record(key, 1, &value).await?;
		Ok(1)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		value: Vec<u8>,
		expected_version: u64,
	) -> Result<u64, StorageError> {
		let _guard = self.write_lock.lock().await;

		let (header, _) = self.read_record(key).await?;
		if header.record_version != expected_version {
			return Err(StorageError::VersionConflict {
				expected: expected_version,
				actual: header.record_version,
			});
		}

		let new_version = header.record_version + 1;
		self.write_record(key, new_version, &value).await?;
		Ok(new_version)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.get_file_path(key);
		Ok(path.exists())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![], // No required fields
			vec![Field::new("storage_path", FieldType::String)],
		);
		schema.validate(config)
	}
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for record files (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/orders")
		.to_string();

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn records_survive_reopening_the_store() {
		let dir = tempfile::tempdir().unwrap();

		{
			let storage = FileStorage::new(dir.path().to_path_buf());
			storage.insert_bytes("orders:1", b"payload".to_vec()).await.unwrap();
			storage
				.compare_and_swap("orders:1", b"updated".to_vec(), 1)
				.await
				.unwrap();
		}

		let reopened = FileStorage::new(dir.path().to_path_buf());
		let (bytes, version) = reopened.get_bytes("orders:1").await.unwrap();
		assert_eq!(bytes, b"updated".to_vec());
		assert_eq!(version, 2);
	}

	#[tokio::test]
	async fn stale_cas_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.insert_bytes("orders:1", b"v1".to_vec()).await.unwrap();
		storage
			.compare_and_swap("orders:1", b"v2".to_vec(), 1)
			.await
			.unwrap();

		let stale = storage.compare_and_swap("orders:1", b"v3".to_vec(), 1).await;
		assert!(matches!(
			stale,
			Err(StorageError::VersionConflict {
				expected: 1,
				actual: 2
			})
		));
	}

	#[tokio::test]
	async fn unrecognized_file_contents_are_a_backend_error() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		tokio::fs::write(dir.path().join("orders_1.bin"), b"not a record")
			.await
			.unwrap();

		let result = storage.get_bytes("orders:1").await;
		assert!(matches!(result, Err(StorageError::Backend(_))));
	}

	#[tokio::test]
	async fn keys_are_sanitized_into_file_names() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.insert_bytes("orders:abc/def", b"x".to_vec()).await.unwrap();
		assert!(dir.path().join("orders_abc_def.bin").exists());
	}
}
