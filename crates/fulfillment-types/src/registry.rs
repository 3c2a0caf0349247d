//! Registry trait for self-registering implementations.
//!
//! Pluggable backends (currently storage) register themselves with the
//! name used in configuration files and a factory function, so the
//! service binary can wire implementations from config alone.

/// Base trait for implementation registries.
///
/// Each pluggable module provides a Registry struct implementing this
/// trait, declaring the configuration name and a factory for building
/// instances from a TOML section.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this
	/// implementation, e.g. "memory" for
	/// `storage.implementations.memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides; each
	/// module defines its own (e.g. `StorageFactory`).
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
