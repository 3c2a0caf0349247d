//! Order state machine implementation.
//!
//! Manages order state transitions with validation. Every mutation goes
//! through one compare-and-commit path: load the order and its record
//! version, authorize the actor, evaluate the guard, mutate, append the
//! timeline entry, and write back conditioned on the version that was
//! read. A concurrent writer makes the commit fail with a conflict
//! instead of overwriting state.

use chrono::{DateTime, Utc};
use fulfillment_storage::StorageService;
use fulfillment_types::{
	Actor, DeadlineNotification, DeliveryNotification, FulfillmentEvent, Order, OrderAction,
	OrderNotification, OrderStatus, PriceApprovalStatus, PriceProposal, StorageKey,
};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

use crate::authorizer::RoleAuthorizer;
use crate::deadline::DeadlineTracker;
use crate::engine::event_bus::EventBus;
use crate::FulfillmentError;

/// Static transition table - each status maps to the statuses it may
/// move to. Everything else is rejected, whatever the guards say.
static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;

	let mut m = HashMap::new();
	m.insert(Pending, HashSet::from([AdminApproved, Cancelled]));
	m.insert(AdminApproved, HashSet::from([SellerApproved, Cancelled]));
	m.insert(SellerApproved, HashSet::from([InProgress, Cancelled]));
	m.insert(InProgress, HashSet::from([ReadyForDelivery]));
	m.insert(ReadyForDelivery, HashSet::from([OutForDelivery]));
	m.insert(OutForDelivery, HashSet::from([Delivered, Suspended]));
	m.insert(Delivered, HashSet::from([Completed]));
	m.insert(Completed, HashSet::new()); // terminal
	m.insert(Cancelled, HashSet::new()); // terminal
	m.insert(Suspended, HashSet::new()); // administrative handling takes over
	m
});

/// Manages order state transitions and persistence.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	event_bus: EventBus,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self { storage, event_bus }
	}

	/// Checks if a state transition is valid.
	pub fn is_valid_transition(from: &OrderStatus, to: &OrderStatus) -> bool {
		TRANSITIONS
			.get(from)
			.is_some_and(|allowed| allowed.contains(to))
	}

	/// Gets an order and its record version by ID.
	pub async fn get_order(&self, order_id: &str) -> Result<(Order, u64), FulfillmentError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), order_id)
			.await
			.map_err(|e| FulfillmentError::from_storage(e, order_id))
	}

	/// Stores a newly created order and announces it.
	pub async fn insert_order(&self, order: &Order) -> Result<(), FulfillmentError> {
		self.storage
			.insert(StorageKey::Orders.as_str(), &order.id, order)
			.await
			.map_err(|e| FulfillmentError::from_storage(e, &order.id))?;

		self.event_bus
			.publish(FulfillmentEvent::Order(OrderNotification::Created {
				order_id: order.id.clone(),
			}))
			.ok();
		Ok(())
	}

	/// Commits an already-mutated order conditioned on the version the
	/// caller read. Used by the lazy lateness evaluation, which mutates
	/// outside a user-initiated transition.
	pub(crate) async fn commit(
		&self,
		order: &Order,
		expected_version: u64,
	) -> Result<u64, FulfillmentError> {
		self.storage
			.update_versioned(StorageKey::Orders.as_str(), &order.id, order, expected_version)
			.await
			.map_err(|e| FulfillmentError::from_storage(e, &order.id))
	}

	/// The single transition path: load, authorize, guard + mutate,
	/// append timeline, compare-and-commit, publish.
	///
	/// The closure performs the guard checks and side effects for one
	/// specific transition and returns any extra notification events to
	/// publish after the commit. Status-change events are published
	/// automatically.
	pub(crate) async fn apply<F>(
		&self,
		order_id: &str,
		actor: &Actor,
		action: OrderAction,
		mutate: F,
	) -> Result<Order, FulfillmentError>
	where
		F: FnOnce(&mut Order, DateTime<Utc>) -> Result<Vec<FulfillmentEvent>, FulfillmentError>,
	{
		let now = Utc::now();
		let (mut order, version) = self.get_order(order_id).await?;

		RoleAuthorizer::authorize(actor.role, order.status, action)?;
		RoleAuthorizer::ensure_actor_binding(actor, &order)?;

		let status_before = order.status;
		let extra_events = mutate(&mut order, now)?;

		if order.status != status_before
			&& !Self::is_valid_transition(&status_before, &order.status)
		{
			return Err(FulfillmentError::InvalidTransition(format!(
				"no transition from {} to {}",
				status_before, order.status
			)));
		}

		order.updated_at = now;
		self.commit(&order, version).await?;

		tracing::info!(
			order_id = %order.id,
			action = %action,
			role = %actor.role,
			status = %order.status,
			"Applied order transition"
		);

		if order.status != status_before {
			self.event_bus
				.publish(FulfillmentEvent::Order(OrderNotification::StatusChanged {
					order_id: order.id.clone(),
					from: status_before,
					to: order.status,
					actor_role: actor.role,
				}))
				.ok();
		}
		for event in extra_events {
			self.event_bus.publish(event).ok();
		}

		Ok(order)
	}

	/// Administrator approval, gated on a verified payment being on
	/// file: either a verified full payment or a confirmed deposit.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn admin_approve(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::AdminApprove, |order, now| {
			if !order.has_verified_payment() {
				return Err(FulfillmentError::InvalidTransition(
					"admin approval requires a verified full payment or a confirmed deposit"
						.into(),
				));
			}

			order.status = OrderStatus::AdminApproved;
			order.record("order approved by administration", actor.role, None, now);
			Ok(vec![])
		})
		.await
	}

	/// Seller acceptance: commits a pickup address and a strictly
	/// future completion deadline. Blocked while a price proposal is
	/// awaiting the seller's decision.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn seller_approve(
		&self,
		order_id: &str,
		actor: &Actor,
		pickup_address: &str,
		deadline: DateTime<Utc>,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::SellerApprove, |order, now| {
			if pickup_address.trim().is_empty() {
				return Err(FulfillmentError::Validation(
					"pickup address must not be empty".into(),
				));
			}
			if order.price_approval_status == Some(PriceApprovalStatus::PendingApproval) {
				return Err(FulfillmentError::InvalidTransition(
					"a price proposal is awaiting the seller's decision".into(),
				));
			}
			DeadlineTracker::validate_deadline(deadline, now)?;

			order.pickup_address = Some(pickup_address.trim().to_string());
			order.completion_deadline = Some(deadline);
			order.status = OrderStatus::SellerApproved;
			order.record(
				"order accepted by seller",
				actor.role,
				Some(format!("completion deadline {}", deadline.to_rfc3339())),
				now,
			);

			Ok(vec![FulfillmentEvent::Deadline(
				DeadlineNotification::DeadlineSet {
					order_id: order.id.clone(),
					deadline,
				},
			)])
		})
		.await
	}

	/// Seller starts production.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn start_work(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::StartWork, |order, now| {
			order.work_started_at = Some(now);
			order.status = OrderStatus::InProgress;
			order.record("production started", actor.role, None, now);
			Ok(vec![])
		})
		.await
	}

	/// Seller marks production complete; the order awaits pickup.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn complete_work(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::CompleteWork, |order, now| {
			order.status = OrderStatus::ReadyForDelivery;
			order.record("production completed", actor.role, None, now);
			Ok(vec![])
		})
		.await
	}

	/// Customer confirms receipt; the order completes.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn confirm_receipt(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::ConfirmReceipt, |order, now| {
			order.completed_at = Some(now);
			order.status = OrderStatus::Completed;
			order.record("receipt confirmed by customer", actor.role, None, now);
			Ok(vec![])
		})
		.await
	}

	/// Cancels a pre-production order. Terminal and irreversible; the
	/// order is kept with its reason, never removed.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn cancel(
		&self,
		order_id: &str,
		actor: &Actor,
		reason: Option<String>,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::Cancel, |order, now| {
			if !order.status.is_pre_production() {
				return Err(FulfillmentError::InvalidTransition(
					"production has started; the order can no longer be cancelled".into(),
				));
			}

			order.status = OrderStatus::Cancelled;
			order.cancelled_at = Some(now);
			order.cancellation_reason = reason.clone();
			order.record("order cancelled", actor.role, reason.clone(), now);

			Ok(vec![FulfillmentEvent::Order(OrderNotification::Cancelled {
				order_id: order.id.clone(),
				reason,
			})])
		})
		.await
	}

	/// Customer proposes an alternate price on a negotiable order. The
	/// order is held at admin_approved until the seller decides.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn propose_price(
		&self,
		order_id: &str,
		actor: &Actor,
		proposed_price: Decimal,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::ProposePrice, |order, now| {
			if order.kind != fulfillment_types::OrderKind::Service {
				return Err(FulfillmentError::InvalidTransition(
					"only service orders are price-negotiable".into(),
				));
			}
			if order.price_approval_status == Some(PriceApprovalStatus::PendingApproval) {
				return Err(FulfillmentError::InvalidTransition(
					"a price proposal is already awaiting the seller".into(),
				));
			}
			if proposed_price <= Decimal::ZERO {
				return Err(FulfillmentError::Validation(
					"proposed price must be positive".into(),
				));
			}
			if proposed_price < order.deposit_amount {
				return Err(FulfillmentError::Validation(
					"proposed price is below the required deposit".into(),
				));
			}

			let original_price = order.total_price;
			order.price_proposal = Some(PriceProposal {
				original_price,
				proposed_price,
				status: PriceApprovalStatus::PendingApproval,
			});
			order.price_approval_status = Some(PriceApprovalStatus::PendingApproval);
			order.record(
				"price proposed by customer",
				actor.role,
				Some(format!("{} instead of {}", proposed_price, original_price)),
				now,
			);

			Ok(vec![FulfillmentEvent::Order(
				OrderNotification::PriceProposed {
					order_id: order.id.clone(),
					proposed_price,
				},
			)])
		})
		.await
	}

	/// Seller accepts the proposed price; the order total is rewritten
	/// to the agreed value and the order may proceed.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn approve_price(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::ApprovePrice, |order, now| {
			let proposal = match order.price_proposal.as_mut() {
				Some(p) if p.status == PriceApprovalStatus::PendingApproval => p,
				_ => {
					return Err(FulfillmentError::InvalidTransition(
						"no price proposal awaiting decision".into(),
					))
				},
			};

			proposal.status = PriceApprovalStatus::Approved;
			let agreed_price = proposal.proposed_price;
			order.price_approval_status = Some(PriceApprovalStatus::Approved);
			order.total_price = agreed_price;
			order.record(
				"price proposal approved by seller",
				actor.role,
				Some(format!("agreed price {}", agreed_price)),
				now,
			);

			Ok(vec![FulfillmentEvent::Order(
				OrderNotification::PriceApproved {
					order_id: order.id.clone(),
					agreed_price,
				},
			)])
		})
		.await
	}

	/// Seller rejects the proposed price. Rejection and cancellation
	/// are one atomic write, so the order can never sit rejected but
	/// live.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn reject_price(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::RejectPrice, |order, now| {
			match order.price_proposal.as_mut() {
				Some(p) if p.status == PriceApprovalStatus::PendingApproval => {
					p.status = PriceApprovalStatus::Rejected;
				},
				_ => {
					return Err(FulfillmentError::InvalidTransition(
						"no price proposal awaiting decision".into(),
					))
				},
			}

			let reason = "price proposal rejected by seller".to_string();
			order.price_approval_status = Some(PriceApprovalStatus::Rejected);
			order.status = OrderStatus::Cancelled;
			order.cancelled_at = Some(now);
			order.cancellation_reason = Some(reason.clone());
			order.record("price proposal rejected", actor.role, None, now);

			Ok(vec![FulfillmentEvent::Order(OrderNotification::Cancelled {
				order_id: order.id.clone(),
				reason: Some(reason),
			})])
		})
		.await
	}

	/// Administrative courier assignment. Also reassigns; the handoff
	/// component itself never changes assignment.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn assign_courier(
		&self,
		order_id: &str,
		actor: &Actor,
		courier_id: &str,
	) -> Result<Order, FulfillmentError> {
		self.apply(order_id, actor, OrderAction::AssignCourier, |order, now| {
			if courier_id.trim().is_empty() {
				return Err(FulfillmentError::Validation(
					"courier id must not be empty".into(),
				));
			}

			let courier_id = courier_id.trim().to_string();
			order.courier_id = Some(courier_id.clone());
			order.record(
				"courier assigned",
				actor.role,
				Some(courier_id.clone()),
				now,
			);

			Ok(vec![FulfillmentEvent::Delivery(
				DeliveryNotification::CourierAssigned {
					order_id: order.id.clone(),
					courier_id,
				},
			)])
		})
		.await
	}
}
