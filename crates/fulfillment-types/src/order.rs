//! Order types for the fulfillment engine.
//!
//! This module defines the order aggregate and the types embedded in it:
//! lifecycle status, line items, payment proofs, price proposals, and the
//! append-only timeline used for auditing transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ActorRole;

/// Status of an order in the fulfillment lifecycle.
///
/// Transitions between statuses are validated by the order state machine;
/// no other component writes this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Order has been placed and awaits payment verification.
	Pending,
	/// An administrator verified payment; the seller may now act.
	AdminApproved,
	/// The seller accepted the order and committed to a deadline.
	SellerApproved,
	/// The seller is producing the order.
	InProgress,
	/// Production is complete; awaiting courier pickup.
	ReadyForDelivery,
	/// A courier has picked the order up from the seller.
	OutForDelivery,
	/// The courier handed the order to the customer.
	Delivered,
	/// The customer confirmed receipt. Terminal.
	Completed,
	/// Cancelled before production. Terminal.
	Cancelled,
	/// The courier could not reach the customer; parked for
	/// administrative handling. Not a cancellation.
	Suspended,
}

impl OrderStatus {
	/// Returns the snake_case name used in storage, logs, and the API.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::AdminApproved => "admin_approved",
			OrderStatus::SellerApproved => "seller_approved",
			OrderStatus::InProgress => "in_progress",
			OrderStatus::ReadyForDelivery => "ready_for_delivery",
			OrderStatus::OutForDelivery => "out_for_delivery",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Suspended => "suspended",
		}
	}

	/// True for statuses from which no further transition is permitted.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
	}

	/// True while production has not started, i.e. the order may still be
	/// cancelled.
	pub fn is_pre_production(&self) -> bool {
		matches!(
			self,
			OrderStatus::Pending | OrderStatus::AdminApproved | OrderStatus::SellerApproved
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Kind of order being fulfilled.
///
/// Service orders are made to measure: they are price-negotiable and may
/// require a deposit before production starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
	/// Ready-made goods sold at the listed price.
	Goods,
	/// Commissioned work; negotiable and deposit-eligible.
	Service,
}

/// One line of the cart snapshot taken at order creation.
///
/// Items are immutable once the order exists; the catalog is an external
/// collaborator and is never consulted again after checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
	pub product_id: String,
	pub quantity: u32,
	pub unit_price: Decimal,
}

impl OrderItem {
	/// Line total (`quantity * unit_price`).
	pub fn line_total(&self) -> Decimal {
		Decimal::from(self.quantity) * self.unit_price
	}
}

/// Whether the deposit for a deposit-requiring order has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
	NotPaid,
	/// Confirmed by an administrator. Immutable once set.
	Paid,
}

/// Review state of the order's payments as a whole.
///
/// Submitting a remaining-balance proof flips this back to `Pending` for
/// administrator re-verification without touching the order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentReview {
	/// No proof awaiting review.
	NotSubmitted,
	/// A proof is on file and awaits administrator verification.
	Pending,
	/// The most recently submitted proof has been verified.
	Verified,
}

/// The three independent payment facts tracked per order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
	/// Single payment covering the whole order.
	Full,
	/// Partial upfront payment required before production.
	Deposit,
	/// Balance due after a deposit.
	Remaining,
}

impl fmt::Display for PaymentKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			PaymentKind::Full => "full",
			PaymentKind::Deposit => "deposit",
			PaymentKind::Remaining => "remaining",
		};
		f.write_str(s)
	}
}

/// Opaque reference to a payment-proof image held by the external file
/// store. The engine stores only the reference, never bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofReference(pub String);

impl ProofReference {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// A submitted payment proof and its verification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
	pub kind: PaymentKind,
	pub proof: ProofReference,
	pub submitted_at: DateTime<Utc>,
	/// Set by the verifying administrator; `None` while the proof is
	/// pending review.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verified_at: Option<DateTime<Utc>>,
}

impl PaymentProof {
	pub fn is_verified(&self) -> bool {
		self.verified_at.is_some()
	}
}

/// Resolution state of a buyer-proposed price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceApprovalStatus {
	PendingApproval,
	Approved,
	Rejected,
}

/// A buyer-initiated counter-offer on a service order's price.
///
/// Resolved by the seller: approval rewrites the order total to the
/// proposed value; rejection cancels the order in the same write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceProposal {
	pub original_price: Decimal,
	pub proposed_price: Decimal,
	pub status: PriceApprovalStatus,
}

/// Immutable audit record of one state transition.
///
/// Timeline events are appended by the state machine in the same storage
/// write as the transition itself and are never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
	pub label: String,
	pub timestamp: DateTime<Utc>,
	/// `None` marks entries the engine generated on its own, such as
	/// the deadline-exceeded record.
	pub actor_role: Option<ActorRole>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
}

/// The order aggregate.
///
/// Serialized as a single storage record so that the status, side-effect
/// fields, and timeline commit atomically under one compare-and-swap.
/// The record version used for optimistic concurrency lives in the
/// storage layer, not on the order itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub status: OrderStatus,
	pub kind: OrderKind,

	pub customer_id: String,
	pub seller_id: String,
	/// Assigned delivery courier, if any. Assignment is administrative.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub courier_id: Option<String>,

	/// Cart snapshot taken at creation; immutable.
	pub items: Vec<OrderItem>,
	pub delivery_address: String,
	pub city: String,
	/// Supplied by the seller at approval time.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pickup_address: Option<String>,

	pub total_price: Decimal,
	pub delivery_fee: Decimal,
	pub requires_deposit: bool,
	pub deposit_amount: Decimal,
	pub deposit_status: DepositStatus,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub full_payment: Option<PaymentProof>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub deposit_payment: Option<PaymentProof>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub remaining_payment: Option<PaymentProof>,
	pub payment_review: PaymentReview,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub price_approval_status: Option<PriceApprovalStatus>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub price_proposal: Option<PriceProposal>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub work_started_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completion_deadline: Option<DateTime<Utc>>,
	/// Sticky: once true it is never cleared, whatever happens later.
	pub is_late: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delivery_picked_up_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delivered_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub suspended_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub suspension_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cancelled_at: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cancellation_reason: Option<String>,

	pub timeline: Vec<TimelineEvent>,
}

impl Order {
	/// Sum of all line totals, excluding the delivery fee.
	pub fn items_total(&self) -> Decimal {
		self.items.iter().map(OrderItem::line_total).sum()
	}

	/// True when a verified payment gates admin approval: either a
	/// verified full payment or a confirmed deposit.
	pub fn has_verified_payment(&self) -> bool {
		let full_verified = self
			.full_payment
			.as_ref()
			.is_some_and(PaymentProof::is_verified);
		full_verified || self.deposit_status == DepositStatus::Paid
	}

	/// Appends one timeline event. The state machine is the only caller;
	/// events are never edited or removed afterwards.
	pub fn record(
		&mut self,
		label: impl Into<String>,
		actor_role: ActorRole,
		notes: Option<String>,
		now: DateTime<Utc>,
	) {
		self.timeline.push(TimelineEvent {
			label: label.into(),
			timestamp: now,
			actor_role: Some(actor_role),
			notes,
		});
	}

	/// Appends a timeline event with no acting party, for records the
	/// engine generates itself.
	pub fn record_system(
		&mut self,
		label: impl Into<String>,
		notes: Option<String>,
		now: DateTime<Utc>,
	) {
		self.timeline.push(TimelineEvent {
			label: label.into(),
			timestamp: now,
			actor_role: None,
			notes,
		});
	}
}

/// Time left until the completion deadline, decomposed for display.
///
/// Derived on read from `deadline - now`; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingTime {
	pub days: i64,
	pub hours: i64,
	/// True when the deadline has already passed.
	pub overdue: bool,
}

/// Input for creating an order from a cart checkout.
///
/// The item list and city arrive from external collaborators (catalog,
/// delivery-fee lookup); the engine snapshots them and computes totals.
/// The customer is the acting party, so the draft carries only the
/// counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
	pub seller_id: String,
	pub kind: OrderKind,
	pub items: Vec<OrderItem>,
	pub delivery_address: String,
	pub city: String,
	pub requires_deposit: bool,
	/// Required (non-zero) when `requires_deposit` is set.
	#[serde(default)]
	pub deposit_amount: Option<Decimal>,
	/// Deposit proof uploaded at checkout, if the customer paid upfront.
	#[serde(default)]
	pub deposit_proof: Option<ProofReference>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn line_totals_sum_into_items_total() {
		let order = Order {
			items: vec![
				OrderItem {
					product_id: "p1".into(),
					quantity: 2,
					unit_price: Decimal::from(100),
				},
				OrderItem {
					product_id: "p2".into(),
					quantity: 3,
					unit_price: Decimal::from(50),
				},
			],
			..test_order()
		};
		assert_eq!(order.items_total(), Decimal::from(350));
	}

	#[test]
	fn verified_payment_requires_verification_not_mere_submission() {
		let mut order = test_order();
		order.full_payment = Some(PaymentProof {
			kind: PaymentKind::Full,
			proof: ProofReference("receipts/1.jpg".into()),
			submitted_at: Utc::now(),
			verified_at: None,
		});
		assert!(!order.has_verified_payment());

		order.full_payment.as_mut().unwrap().verified_at = Some(Utc::now());
		assert!(order.has_verified_payment());
	}

	#[test]
	fn paid_deposit_counts_as_verified_payment() {
		let mut order = test_order();
		order.requires_deposit = true;
		order.deposit_status = DepositStatus::Paid;
		assert!(order.has_verified_payment());
	}

	#[test]
	fn status_serializes_snake_case() {
		let json = serde_json::to_string(&OrderStatus::ReadyForDelivery).unwrap();
		assert_eq!(json, "\"ready_for_delivery\"");
	}

	fn test_order() -> Order {
		let now = Utc::now();
		Order {
			id: "order-1".into(),
			created_at: now,
			updated_at: now,
			status: OrderStatus::Pending,
			kind: OrderKind::Goods,
			customer_id: "customer-1".into(),
			seller_id: "seller-1".into(),
			courier_id: None,
			items: vec![OrderItem {
				product_id: "p1".into(),
				quantity: 1,
				unit_price: Decimal::from(100),
			}],
			delivery_address: "12 Pottery Lane".into(),
			city: "riyadh".into(),
			pickup_address: None,
			total_price: Decimal::from(100),
			delivery_fee: Decimal::from(15),
			requires_deposit: false,
			deposit_amount: Decimal::ZERO,
			deposit_status: DepositStatus::NotPaid,
			full_payment: None,
			deposit_payment: None,
			remaining_payment: None,
			payment_review: PaymentReview::NotSubmitted,
			price_approval_status: None,
			price_proposal: None,
			work_started_at: None,
			completion_deadline: None,
			is_late: false,
			delivery_picked_up_at: None,
			delivered_at: None,
			suspended_at: None,
			suspension_reason: None,
			completed_at: None,
			cancelled_at: None,
			cancellation_reason: None,
			timeline: Vec::new(),
		}
	}
}
