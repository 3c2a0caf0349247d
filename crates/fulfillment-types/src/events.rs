//! Notification events emitted by the engine.
//!
//! The engine publishes exactly one event per committed transition onto a
//! broadcast bus. An external notifier consumes them; the engine never
//! delivers notifications itself, and publishing never blocks a
//! transition.

use crate::{ActorRole, OrderStatus, PaymentKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Main event type covering all engine notifications.
///
/// Events are grouped by the concern that produces them so consumers can
/// filter on the outer variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FulfillmentEvent {
	/// Lifecycle transitions on the order status.
	Order(OrderNotification),
	/// Payment proof submissions and verifications.
	Payment(PaymentNotification),
	/// Courier handoff milestones.
	Delivery(DeliveryNotification),
	/// Deadline bookkeeping.
	Deadline(DeadlineNotification),
}

/// Events for canonical status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderNotification {
	/// An order was created and entered the lifecycle.
	Created { order_id: String },
	/// The status moved along one edge of the transition graph.
	StatusChanged {
		order_id: String,
		from: OrderStatus,
		to: OrderStatus,
		actor_role: ActorRole,
	},
	/// A buyer proposed an alternate price on a service order.
	PriceProposed {
		order_id: String,
		proposed_price: rust_decimal::Decimal,
	},
	/// The seller accepted a proposed price; the order total now
	/// reflects the agreed value.
	PriceApproved {
		order_id: String,
		agreed_price: rust_decimal::Decimal,
	},
	/// The order was cancelled with the recorded reason.
	Cancelled {
		order_id: String,
		reason: Option<String>,
	},
}

/// Events for payment-ledger activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaymentNotification {
	/// A proof was submitted and awaits administrator review.
	ProofSubmitted {
		order_id: String,
		kind: PaymentKind,
	},
	/// An administrator verified the pending proof.
	PaymentVerified {
		order_id: String,
		kind: PaymentKind,
	},
}

/// Events for the delivery handoff path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryNotification {
	/// A courier was assigned to the order.
	CourierAssigned {
		order_id: String,
		courier_id: String,
	},
	/// The courier confirmed physical pickup from the seller.
	PickedUp { order_id: String },
	/// The courier confirmed handoff to the customer.
	Delivered { order_id: String },
	/// The customer could not be reached; the order is parked.
	Suspended { order_id: String, reason: String },
}

/// Events for deadline tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeadlineNotification {
	/// The seller committed to a completion deadline.
	DeadlineSet {
		order_id: String,
		deadline: DateTime<Utc>,
	},
	/// The deadline passed while the order was still in production.
	/// Emitted at most once per order.
	DeadlineExceeded { order_id: String },
}
