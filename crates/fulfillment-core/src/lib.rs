//! Core fulfillment engine for the craft marketplace.
//!
//! This crate owns the order lifecycle: the state machine and its
//! guards, the role-authorization table, the payment ledger, deadline
//! tracking, and the courier handoff path. All mutations flow through a
//! single compare-and-commit write so concurrent actors cannot tear an
//! order's state.

use fulfillment_storage::StorageError;
use thiserror::Error;

pub mod authorizer;
pub mod deadline;
pub mod engine;
pub mod handoff;
pub mod ledger;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use authorizer::RoleAuthorizer;
pub use deadline::DeadlineTracker;
pub use engine::{event_bus::EventBus, FulfillmentEngine, OrderView};
pub use handoff::DeliveryHandoff;
pub use ledger::PaymentLedger;
pub use state::OrderStateMachine;

/// Errors returned to callers of the fulfillment engine.
///
/// Every kind is recoverable: the caller re-attempts explicitly with
/// corrected input or after re-reading current state. The engine never
/// retries a failed transition on its own.
#[derive(Debug, Error)]
pub enum FulfillmentError {
	/// A guard rejected the transition: wrong role, wrong current
	/// status, or a missing precondition. The message names the guard.
	#[error("Invalid transition: {0}")]
	InvalidTransition(String),
	/// The order changed under the caller; the optimistic version check
	/// failed and nothing was written.
	#[error("Order {order_id} was modified concurrently; re-read and retry")]
	ConcurrentModification { order_id: String },
	/// Malformed input, e.g. an empty suspension reason or a deadline
	/// that is not in the future.
	#[error("Validation failed: {0}")]
	Validation(String),
	/// The order does not exist.
	#[error("Order not found: {0}")]
	NotFound(String),
	/// The storage backend failed.
	#[error("Storage error: {0}")]
	Storage(String),
}

impl FulfillmentError {
	/// Maps a storage failure for the given order into the matching
	/// caller-facing error kind.
	pub(crate) fn from_storage(err: StorageError, order_id: &str) -> Self {
		match err {
			StorageError::NotFound => FulfillmentError::NotFound(order_id.to_string()),
			StorageError::VersionConflict { .. } => FulfillmentError::ConcurrentModification {
				order_id: order_id.to_string(),
			},
			other => FulfillmentError::Storage(other.to_string()),
		}
	}
}

impl From<FulfillmentError> for fulfillment_types::ApiError {
	fn from(err: FulfillmentError) -> Self {
		use fulfillment_types::ApiError;

		match err {
			FulfillmentError::InvalidTransition(message) => ApiError::InvalidTransition {
				message,
				order_id: None,
			},
			FulfillmentError::ConcurrentModification { order_id } => ApiError::Conflict {
				message: format!(
					"Order {} was modified concurrently; re-read and retry",
					order_id
				),
				order_id: Some(order_id),
			},
			FulfillmentError::Validation(message) => ApiError::Validation {
				message,
				order_id: None,
			},
			FulfillmentError::NotFound(order_id) => ApiError::NotFound {
				message: format!("Order not found: {}", order_id),
			},
			FulfillmentError::Storage(message) => ApiError::Internal { message },
		}
	}
}
