//! Actor and action types for transition authorization.
//!
//! Identity resolution happens outside the engine: callers supply the
//! acting party's id and role with every request, and the authorizer
//! decides which actions that role may take in the order's current state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four roles that may act on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
	Customer,
	Seller,
	Administrator,
	Courier,
}

impl ActorRole {
	pub fn as_str(&self) -> &'static str {
		match self {
			ActorRole::Customer => "customer",
			ActorRole::Seller => "seller",
			ActorRole::Administrator => "administrator",
			ActorRole::Courier => "courier",
		}
	}
}

impl fmt::Display for ActorRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A resolved actor as supplied by the caller.
///
/// The engine trusts this identity; verifying it is the authentication
/// layer's job, which sits outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	pub id: String,
	pub role: ActorRole,
}

impl Actor {
	pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
		Self {
			id: id.into(),
			role,
		}
	}
}

/// Every action an actor can request against an existing order.
///
/// Order creation is not listed: it precedes the order's existence and is
/// guarded by validation rather than by the authorization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
	AdminApprove,
	SellerApprove,
	StartWork,
	CompleteWork,
	AssignCourier,
	Pickup,
	Deliver,
	Suspend,
	ConfirmReceipt,
	Cancel,
	ProposePrice,
	ApprovePrice,
	RejectPrice,
	SubmitFullPayment,
	SubmitDepositPayment,
	SubmitRemainingPayment,
	VerifyPayment,
}

impl OrderAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderAction::AdminApprove => "admin_approve",
			OrderAction::SellerApprove => "seller_approve",
			OrderAction::StartWork => "start_work",
			OrderAction::CompleteWork => "complete_work",
			OrderAction::AssignCourier => "assign_courier",
			OrderAction::Pickup => "pickup",
			OrderAction::Deliver => "deliver",
			OrderAction::Suspend => "suspend",
			OrderAction::ConfirmReceipt => "confirm_receipt",
			OrderAction::Cancel => "cancel",
			OrderAction::ProposePrice => "propose_price",
			OrderAction::ApprovePrice => "approve_price",
			OrderAction::RejectPrice => "reject_price",
			OrderAction::SubmitFullPayment => "submit_full_payment",
			OrderAction::SubmitDepositPayment => "submit_deposit_payment",
			OrderAction::SubmitRemainingPayment => "submit_remaining_payment",
			OrderAction::VerifyPayment => "verify_payment",
		}
	}
}

impl fmt::Display for OrderAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
