//! Courier handoff: pickup, delivery, and the suspension path.
//!
//! Active only while an order is ready for or out for delivery. A
//! courier may act solely on orders assigned to them; assignment and
//! reassignment are administrative actions handled elsewhere.
//! Suspension is the courier's alternate outcome when the customer
//! cannot be reached. It parks the order for administrative handling
//! and is explicitly not a cancellation: nothing is refunded or closed,
//! and the courier assignment stays in place.

use fulfillment_types::{
	Actor, DeliveryNotification, FulfillmentEvent, Order, OrderAction, OrderStatus,
};
use std::sync::Arc;
use tracing::instrument;

use crate::state::OrderStateMachine;
use crate::FulfillmentError;

/// Drives the courier-facing leg of the lifecycle.
pub struct DeliveryHandoff {
	machine: Arc<OrderStateMachine>,
}

impl DeliveryHandoff {
	pub fn new(machine: Arc<OrderStateMachine>) -> Self {
		Self { machine }
	}

	/// Courier confirms physical pickup from the seller. Pickup is an
	/// explicit status transition, so courier-facing views never need
	/// to infer it from a stray timestamp.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn pickup(&self, order_id: &str, actor: &Actor) -> Result<Order, FulfillmentError> {
		self.machine
			.apply(order_id, actor, OrderAction::Pickup, |order, now| {
				order.delivery_picked_up_at = Some(now);
				order.status = OrderStatus::OutForDelivery;
				order.record("picked up by courier", actor.role, None, now);

				Ok(vec![FulfillmentEvent::Delivery(
					DeliveryNotification::PickedUp {
						order_id: order.id.clone(),
					},
				)])
			})
			.await
	}

	/// Courier confirms physical handoff to the customer.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn deliver(&self, order_id: &str, actor: &Actor) -> Result<Order, FulfillmentError> {
		self.machine
			.apply(order_id, actor, OrderAction::Deliver, |order, now| {
				order.delivered_at = Some(now);
				order.status = OrderStatus::Delivered;
				order.record("delivered to customer", actor.role, None, now);

				Ok(vec![FulfillmentEvent::Delivery(
					DeliveryNotification::Delivered {
						order_id: order.id.clone(),
					},
				)])
			})
			.await
	}

	/// Courier could not reach the customer. Requires a non-empty
	/// free-text reason; the order stays assigned and passes to
	/// administrative handling.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn suspend(
		&self,
		order_id: &str,
		actor: &Actor,
		reason: &str,
	) -> Result<Order, FulfillmentError> {
		self.machine
			.apply(order_id, actor, OrderAction::Suspend, |order, now| {
				let reason = reason.trim();
				if reason.is_empty() {
					return Err(FulfillmentError::Validation(
						"suspension reason must not be empty".into(),
					));
				}

				order.suspended_at = Some(now);
				order.suspension_reason = Some(reason.to_string());
				order.status = OrderStatus::Suspended;
				order.record(
					"delivery suspended",
					actor.role,
					Some(reason.to_string()),
					now,
				);

				Ok(vec![FulfillmentEvent::Delivery(
					DeliveryNotification::Suspended {
						order_id: order.id.clone(),
						reason: reason.to_string(),
					},
				)])
			})
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::event_bus::EventBus;
	use crate::testing::order_in;
	use fulfillment_storage::{implementations::memory::MemoryStorage, StorageService};
	use fulfillment_types::ActorRole;

	async fn handoff_with(order: Order) -> DeliveryHandoff {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let machine = Arc::new(OrderStateMachine::new(storage, EventBus::new(16)));
		machine.insert_order(&order).await.unwrap();
		DeliveryHandoff::new(machine)
	}

	fn assigned(status: OrderStatus) -> Order {
		let mut order = order_in(status);
		order.courier_id = Some("d1".into());
		order
	}

	fn courier() -> Actor {
		Actor::new("d1", ActorRole::Courier)
	}

	#[tokio::test]
	async fn pickup_moves_the_order_out_for_delivery() {
		let handoff = handoff_with(assigned(OrderStatus::ReadyForDelivery)).await;

		let order = handoff.pickup("order-1", &courier()).await.unwrap();
		assert_eq!(order.status, OrderStatus::OutForDelivery);
		assert!(order.delivery_picked_up_at.is_some());
	}

	#[tokio::test]
	async fn pickup_requires_the_assigned_courier() {
		let handoff = handoff_with(assigned(OrderStatus::ReadyForDelivery)).await;

		let err = handoff
			.pickup("order-1", &Actor::new("d9", ActorRole::Courier))
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn unassigned_orders_reject_every_courier() {
		let handoff = handoff_with(order_in(OrderStatus::ReadyForDelivery)).await;

		let err = handoff.pickup("order-1", &courier()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn delivery_is_only_confirmed_out_for_delivery() {
		let handoff = handoff_with(assigned(OrderStatus::ReadyForDelivery)).await;

		let err = handoff.deliver("order-1", &courier()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn suspension_parks_the_order_without_cancelling() {
		let handoff = handoff_with(assigned(OrderStatus::OutForDelivery)).await;

		let order = handoff
			.suspend("order-1", &courier(), "لم يرد العميل")
			.await
			.unwrap();

		assert_eq!(order.status, OrderStatus::Suspended);
		assert!(order.suspended_at.is_some());
		assert_eq!(order.suspension_reason.as_deref(), Some("لم يرد العميل"));
		// Still assigned, still not cancelled
		assert_eq!(order.courier_id.as_deref(), Some("d1"));
		assert!(order.cancelled_at.is_none());
	}

	#[tokio::test]
	async fn blank_suspension_reasons_are_rejected() {
		let handoff = handoff_with(assigned(OrderStatus::OutForDelivery)).await;

		for reason in ["", "   ", "\n\t"] {
			let err = handoff
				.suspend("order-1", &courier(), reason)
				.await
				.unwrap_err();
			assert!(matches!(err, FulfillmentError::Validation(_)));
		}
	}
}
