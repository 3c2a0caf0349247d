//! Shared builders for the crate's tests.

use chrono::{DateTime, TimeZone, Utc};
use fulfillment_types::{
	DepositStatus, Order, OrderItem, OrderKind, OrderStatus, PaymentReview,
};
use rust_decimal::Decimal;

/// A fixed instant to anchor time-sensitive assertions.
pub(crate) fn anchor() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// A plain goods order in the given status with a single 100-unit item.
pub(crate) fn order_in(status: OrderStatus) -> Order {
	let now = anchor();
	Order {
		id: "order-1".into(),
		created_at: now,
		updated_at: now,
		status,
		kind: OrderKind::Goods,
		customer_id: "c1".into(),
		seller_id: "s1".into(),
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

/// A service order requiring a deposit, as in the negotiable flow.
pub(crate) fn service_order_in(status: OrderStatus, deposit: Decimal) -> Order {
	let mut order = order_in(status);
	order.kind = OrderKind::Service;
	order.requires_deposit = true;
	order.deposit_amount = deposit;
	order
}
