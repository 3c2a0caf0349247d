//! API types for the fulfillment HTTP API.
//!
//! Request and response bodies for the order endpoints, plus the
//! structured error type with HTTP status mapping. Every mutating
//! request carries the acting party, since identity resolution happens
//! outside the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Actor, OrderAction, OrderDraft, PaymentKind, ProofReference};

/// Body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub actor: Actor,
	#[serde(flatten)]
	pub draft: OrderDraft,
}

/// Body for actions that need nothing beyond the acting party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
	pub actor: Actor,
}

/// Body for submitting a payment proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPaymentRequest {
	pub actor: Actor,
	pub kind: PaymentKind,
	pub proof: ProofReference,
}

/// Body for the seller's approval, committing address and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerApproveRequest {
	pub actor: Actor,
	pub pickup_address: String,
	pub completion_deadline: DateTime<Utc>,
}

/// Body for a buyer price proposal on a service order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposePriceRequest {
	pub actor: Actor,
	pub proposed_price: Decimal,
}

/// Body for assigning a courier (administrative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignCourierRequest {
	pub actor: Actor,
	pub courier_id: String,
}

/// Body for courier suspension; the reason must be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendRequest {
	pub actor: Actor,
	pub reason: String,
}

/// Body for cancellation with an optional reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
	pub actor: Actor,
	#[serde(default)]
	pub reason: Option<String>,
}

/// Error body returned for every rejected request.
///
/// `error` names the specific guard or failure kind so the caller can
/// surface it; rejected actions are never reported generically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Machine-readable error kind.
	pub error: String,
	/// Human-readable description naming the failed guard.
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub order_id: Option<String>,
}

/// Structured API error with HTTP status mapping.
#[derive(Debug)]
pub enum ApiError {
	/// A guard rejected the transition (409).
	InvalidTransition { message: String, order_id: Option<String> },
	/// The optimistic concurrency check failed (409).
	Conflict { message: String, order_id: Option<String> },
	/// Malformed input (422).
	Validation { message: String, order_id: Option<String> },
	/// Unknown order (404).
	NotFound { message: String },
	/// Storage or other internal failure (500).
	Internal { message: String },
}

impl ApiError {
	/// HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			ApiError::InvalidTransition { .. } | ApiError::Conflict { .. } => 409,
			ApiError::Validation { .. } => 422,
			ApiError::NotFound { .. } => 404,
			ApiError::Internal { .. } => 500,
		}
	}

	/// Machine-readable kind for the response body.
	pub fn kind(&self) -> &'static str {
		match self {
			ApiError::InvalidTransition { .. } => "invalid_transition",
			ApiError::Conflict { .. } => "concurrent_modification",
			ApiError::Validation { .. } => "validation",
			ApiError::NotFound { .. } => "not_found",
			ApiError::Internal { .. } => "internal",
		}
	}

	/// Converts to the serializable response body.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (message, order_id) = match self {
			ApiError::InvalidTransition { message, order_id }
			| ApiError::Conflict { message, order_id }
			| ApiError::Validation { message, order_id } => (message.clone(), order_id.clone()),
			ApiError::NotFound { message } | ApiError::Internal { message } => {
				(message.clone(), None)
			},
		};
		ErrorResponse {
			error: self.kind().to_string(),
			message,
			order_id,
		}
	}
}

impl fmt::Display for ApiError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind(), self.to_error_response().message)
	}
}

impl std::error::Error for ApiError {}

impl axum::response::IntoResponse for ApiError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

/// Actions query response: what the calling role may do right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermittedActionsResponse {
	pub order_id: String,
	pub actions: Vec<OrderAction>,
}
