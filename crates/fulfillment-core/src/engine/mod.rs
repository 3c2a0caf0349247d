//! The fulfillment engine facade.
//!
//! Wires the state machine, payment ledger, deadline tracker, delivery
//! handoff, and event bus behind the operation set the marketplace
//! calls: one method per actor intent plus the read model. Screens talk
//! to this facade only; none of the inner components is reachable from
//! the outside.

pub mod event_bus;

use chrono::Utc;
use fulfillment_config::Config;
use fulfillment_storage::StorageService;
use fulfillment_types::{
	Actor, ActorRole, DeadlineNotification, DepositStatus, FulfillmentEvent, Order, OrderAction,
	OrderDraft, OrderKind, OrderStatus, PaymentKind, PaymentProof, PaymentReview, ProofReference,
	RemainingTime,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::authorizer::RoleAuthorizer;
use crate::deadline::DeadlineTracker;
use crate::handoff::DeliveryHandoff;
use crate::ledger::PaymentLedger;
use crate::state::OrderStateMachine;
use crate::FulfillmentError;
use event_bus::EventBus;

/// Read model for one order.
///
/// Lateness has already been evaluated (and persisted if it flipped) by
/// the time a view is returned, so every caller observes consistent
/// state. Remaining time is derived here, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
	pub order: Order,
	pub remaining_time: Option<RemainingTime>,
}

/// Main entry point for the order fulfillment lifecycle.
pub struct FulfillmentEngine {
	config: Config,
	machine: Arc<OrderStateMachine>,
	ledger: PaymentLedger,
	handoff: DeliveryHandoff,
	event_bus: EventBus,
}

impl FulfillmentEngine {
	/// Creates an engine over the given storage backend.
	pub fn new(config: Config, storage: Arc<StorageService>) -> Self {
		let event_bus = EventBus::default();
		let machine = Arc::new(OrderStateMachine::new(storage, event_bus.clone()));
		let ledger = PaymentLedger::new(machine.clone());
		let handoff = DeliveryHandoff::new(machine.clone());

		Self {
			config,
			machine,
			ledger,
			handoff,
			event_bus,
		}
	}

	/// Returns the notification bus for external consumers.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Returns the engine configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Creates an order from a cart checkout.
	///
	/// Snapshots the cart, resolves the delivery fee from the city
	/// table, and enforces the deposit invariants before anything is
	/// persisted. A deposit proof uploaded at checkout is recorded as a
	/// pending submission.
	#[instrument(skip_all, fields(customer_id = %actor.id))]
	pub async fn create_order(
		&self,
		actor: &Actor,
		draft: OrderDraft,
	) -> Result<Order, FulfillmentError> {
		if actor.role != ActorRole::Customer {
			return Err(FulfillmentError::InvalidTransition(
				"only customers place orders".into(),
			));
		}
		if draft.items.is_empty() {
			return Err(FulfillmentError::Validation("cart must not be empty".into()));
		}
		for item in &draft.items {
			if item.quantity == 0 {
				return Err(FulfillmentError::Validation(format!(
					"item {} has zero quantity",
					item.product_id
				)));
			}
			if item.unit_price < Decimal::ZERO {
				return Err(FulfillmentError::Validation(format!(
					"item {} has a negative price",
					item.product_id
				)));
			}
		}
		if draft.delivery_address.trim().is_empty() || draft.city.trim().is_empty() {
			return Err(FulfillmentError::Validation(
				"delivery address and city are required".into(),
			));
		}
		if draft.seller_id.trim().is_empty() {
			return Err(FulfillmentError::Validation("seller is required".into()));
		}

		let city = draft.city.trim().to_string();
		let delivery_fee = self.config.delivery.fee_for(&city).ok_or_else(|| {
			FulfillmentError::Validation(format!("no delivery coverage for city '{}'", city))
		})?;

		let now = Utc::now();
		let total_price: Decimal = draft.items.iter().map(|i| i.line_total()).sum();

		let deposit_amount = if draft.requires_deposit {
			if draft.kind != OrderKind::Service {
				return Err(FulfillmentError::Validation(
					"only service orders take deposits".into(),
				));
			}
			let amount = draft.deposit_amount.ok_or_else(|| {
				FulfillmentError::Validation("deposit amount is required".into())
			})?;
			if amount <= Decimal::ZERO {
				return Err(FulfillmentError::Validation(
					"deposit amount must be positive".into(),
				));
			}
			if amount > total_price {
				return Err(FulfillmentError::Validation(
					"deposit amount exceeds the order total".into(),
				));
			}
			amount
		} else {
			Decimal::ZERO
		};

		let deposit_payment = draft.deposit_proof.map(|proof| PaymentProof {
			kind: PaymentKind::Deposit,
			proof,
			submitted_at: now,
			verified_at: None,
		});
		if deposit_payment.is_some() && !draft.requires_deposit {
			return Err(FulfillmentError::Validation(
				"deposit proof supplied for an order without a deposit".into(),
			));
		}
		let payment_review = if deposit_payment.is_some() {
			PaymentReview::Pending
		} else {
			PaymentReview::NotSubmitted
		};

		let mut order = Order {
			id: Uuid::new_v4().to_string(),
			created_at: now,
			updated_at: now,
			status: OrderStatus::Pending,
			kind: draft.kind,
			customer_id: actor.id.clone(),
			seller_id: draft.seller_id.trim().to_string(),
			courier_id: None,
			items: draft.items,
			delivery_address: draft.delivery_address.trim().to_string(),
			city,
			pickup_address: None,
			total_price,
			delivery_fee,
			requires_deposit: draft.requires_deposit,
			deposit_amount,
			deposit_status: DepositStatus::NotPaid,
			full_payment: None,
			deposit_payment,
			remaining_payment: None,
			payment_review,
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
		};
		order.record("order placed", actor.role, None, now);
		if order.deposit_payment.is_some() {
			order.record("deposit proof submitted", actor.role, None, now);
		}

		self.machine.insert_order(&order).await?;
		Ok(order)
	}

	/// Submits a payment proof (full, deposit, or remaining).
	pub async fn submit_payment(
		&self,
		order_id: &str,
		actor: &Actor,
		kind: PaymentKind,
		proof: ProofReference,
	) -> Result<Order, FulfillmentError> {
		self.ledger.submit_proof(order_id, actor, kind, proof).await
	}

	/// Administrator verifies the payment proof awaiting review.
	pub async fn verify_payment(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.ledger.verify_payment(order_id, actor).await
	}

	/// Administrator approves the order once payment is verified.
	pub async fn admin_approve(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.admin_approve(order_id, actor).await
	}

	/// Customer proposes an alternate price on a service order.
	pub async fn propose_price(
		&self,
		order_id: &str,
		actor: &Actor,
		proposed_price: Decimal,
	) -> Result<Order, FulfillmentError> {
		self.machine
			.propose_price(order_id, actor, proposed_price)
			.await
	}

	/// Seller accepts the proposed price.
	pub async fn approve_price(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.approve_price(order_id, actor).await
	}

	/// Seller rejects the proposed price; the order cancels atomically.
	pub async fn reject_price(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.reject_price(order_id, actor).await
	}

	/// Seller accepts the order with a pickup address and deadline.
	pub async fn seller_approve(
		&self,
		order_id: &str,
		actor: &Actor,
		pickup_address: &str,
		deadline: chrono::DateTime<Utc>,
	) -> Result<Order, FulfillmentError> {
		self.machine
			.seller_approve(order_id, actor, pickup_address, deadline)
			.await
	}

	/// Seller starts production.
	pub async fn start_work(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.start_work(order_id, actor).await
	}

	/// Seller marks production complete.
	pub async fn complete_work(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.complete_work(order_id, actor).await
	}

	/// Administrator assigns (or reassigns) the delivery courier.
	pub async fn assign_courier(
		&self,
		order_id: &str,
		actor: &Actor,
		courier_id: &str,
	) -> Result<Order, FulfillmentError> {
		self.machine.assign_courier(order_id, actor, courier_id).await
	}

	/// Courier confirms pickup from the seller.
	pub async fn pickup(&self, order_id: &str, actor: &Actor) -> Result<Order, FulfillmentError> {
		self.handoff.pickup(order_id, actor).await
	}

	/// Courier confirms handoff to the customer.
	pub async fn deliver(&self, order_id: &str, actor: &Actor) -> Result<Order, FulfillmentError> {
		self.handoff.deliver(order_id, actor).await
	}

	/// Courier suspends delivery with a reason.
	pub async fn suspend(
		&self,
		order_id: &str,
		actor: &Actor,
		reason: &str,
	) -> Result<Order, FulfillmentError> {
		self.handoff.suspend(order_id, actor, reason).await
	}

	/// Customer confirms receipt; the order completes.
	pub async fn confirm_receipt(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine.confirm_receipt(order_id, actor).await
	}

	/// Cancels a pre-production order.
	pub async fn cancel(
		&self,
		order_id: &str,
		actor: &Actor,
		reason: Option<String>,
	) -> Result<Order, FulfillmentError> {
		self.machine.cancel(order_id, actor, reason).await
	}

	/// Loads the read model for an order.
	///
	/// Lateness is evaluated opportunistically here: if the deadline
	/// has passed during active production, the sticky flag is flipped,
	/// persisted, and announced before the view is returned. Losing the
	/// persist race to a concurrent writer is tolerated; the next read
	/// re-evaluates.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn get_order(&self, order_id: &str) -> Result<OrderView, FulfillmentError> {
		let now = Utc::now();
		let (mut order, version) = self.machine.get_order(order_id).await?;

		if DeadlineTracker::evaluate(&mut order, now) {
			match self.machine.commit(&order, version).await {
				Ok(_) => {
					self.event_bus
						.publish(FulfillmentEvent::Deadline(
							DeadlineNotification::DeadlineExceeded {
								order_id: order.id.clone(),
							},
						))
						.ok();
				},
				Err(FulfillmentError::ConcurrentModification { .. }) => {
					// Another writer committed first; re-read and let a
					// later read evaluate lateness against fresh state.
					let (fresh, _) = self.machine.get_order(order_id).await?;
					order = fresh;
				},
				Err(e) => return Err(e),
			}
		}

		let remaining_time = DeadlineTracker::remaining(&order, now);
		Ok(OrderView {
			order,
			remaining_time,
		})
	}

	/// Returns the actions the given role may currently take on the
	/// order, from the same table the transition path consults.
	pub async fn permitted_actions(
		&self,
		order_id: &str,
		role: ActorRole,
	) -> Result<Vec<OrderAction>, FulfillmentError> {
		let (order, _) = self.machine.get_order(order_id).await?;
		let mut actions: Vec<OrderAction> = RoleAuthorizer::permitted_actions(role, order.status)
			.iter()
			.copied()
			.collect();
		actions.sort_by_key(|action| action.as_str());
		Ok(actions)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::order_in;
	use chrono::Duration;
	use fulfillment_storage::implementations::memory::MemoryStorage;
	use fulfillment_types::{OrderItem, OrderNotification, PaymentNotification};

	fn test_config() -> Config {
		Config::from_toml_str(
			r#"
[marketplace]
id = "test-market"

[storage]
primary = "memory"
[storage.implementations.memory]

[delivery]
[delivery.city_fees]
riyadh = "15"
jeddah = "17.50"
"#,
		)
		.unwrap()
	}

	fn engine() -> FulfillmentEngine {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		FulfillmentEngine::new(test_config(), storage)
	}

	fn customer() -> Actor {
		Actor::new("c1", ActorRole::Customer)
	}

	fn seller() -> Actor {
		Actor::new("s1", ActorRole::Seller)
	}

	fn admin() -> Actor {
		Actor::new("a1", ActorRole::Administrator)
	}

	fn courier() -> Actor {
		Actor::new("d1", ActorRole::Courier)
	}

	fn goods_draft() -> OrderDraft {
		OrderDraft {
			seller_id: "s1".into(),
			kind: OrderKind::Goods,
			items: vec![OrderItem {
				product_id: "p1".into(),
				quantity: 2,
				unit_price: Decimal::from(40),
			}],
			delivery_address: "12 Pottery Lane".into(),
			city: "riyadh".into(),
			requires_deposit: false,
			deposit_amount: None,
			deposit_proof: None,
		}
	}

	/// Deposit-requiring service draft: 2x100 + 3x50 = 350 total, 105
	/// deposit.
	fn deposit_draft() -> OrderDraft {
		OrderDraft {
			seller_id: "s1".into(),
			kind: OrderKind::Service,
			items: vec![
				OrderItem {
					product_id: "vase".into(),
					quantity: 2,
					unit_price: Decimal::from(100),
				},
				OrderItem {
					product_id: "bowl".into(),
					quantity: 3,
					unit_price: Decimal::from(50),
				},
			],
			delivery_address: "7 Loom Street".into(),
			city: "jeddah".into(),
			requires_deposit: true,
			deposit_amount: Some(Decimal::from(105)),
			deposit_proof: Some(ProofReference("receipts/deposit.jpg".into())),
		}
	}

	#[tokio::test]
	async fn full_lifecycle_reaches_completed() {
		let engine = engine();

		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.total_price, Decimal::from(80));
		assert_eq!(order.delivery_fee, Decimal::from(15));

		let id = order.id.clone();
		engine
			.submit_payment(
				&id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();

		let deadline = Utc::now() + Duration::days(3);
		engine
			.seller_approve(&id, &seller(), "Atelier 5, Old Souk", deadline)
			.await
			.unwrap();
		engine.start_work(&id, &seller()).await.unwrap();
		engine.complete_work(&id, &seller()).await.unwrap();
		engine.assign_courier(&id, &admin(), "d1").await.unwrap();
		engine.pickup(&id, &courier()).await.unwrap();
		engine.deliver(&id, &courier()).await.unwrap();
		let order = engine.confirm_receipt(&id, &customer()).await.unwrap();

		assert_eq!(order.status, OrderStatus::Completed);
		assert!(order.completed_at.is_some());
		// One timeline entry per step: placed, proof, verified,
		// admin ok, seller ok, started, completed, courier, pickup,
		// delivered, receipt
		assert_eq!(order.timeline.len(), 11);
	}

	#[tokio::test]
	async fn deposit_scenario_keeps_status_while_review_reopens() {
		let engine = engine();

		let order = engine
			.create_order(&customer(), deposit_draft())
			.await
			.unwrap();
		assert_eq!(order.total_price, Decimal::from(350));
		assert_eq!(order.deposit_amount, Decimal::from(105));
		assert_eq!(order.payment_review, PaymentReview::Pending);
		let id = order.id.clone();

		// Administrator confirms the deposit uploaded at checkout
		let order = engine.verify_payment(&id, &admin()).await.unwrap();
		assert_eq!(order.deposit_status, DepositStatus::Paid);

		let order = engine.admin_approve(&id, &admin()).await.unwrap();
		assert_eq!(order.status, OrderStatus::AdminApproved);

		let deadline = Utc::now() + Duration::days(3);
		let order = engine
			.seller_approve(&id, &seller(), "Atelier 5, Old Souk", deadline)
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::SellerApproved);

		engine.start_work(&id, &seller()).await.unwrap();

		// Remaining balance submitted mid-production: review reopens,
		// status stays put
		let order = engine
			.submit_payment(
				&id,
				&customer(),
				PaymentKind::Remaining,
				ProofReference("receipts/rest.jpg".into()),
			)
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::InProgress);
		assert_eq!(order.payment_review, PaymentReview::Pending);
	}

	#[tokio::test]
	async fn admin_approval_requires_verified_payment() {
		let engine = engine();
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();

		// Nothing submitted
		let err = engine.admin_approve(&order.id, &admin()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));

		// Submitted but unverified
		engine
			.submit_payment(
				&order.id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		let err = engine.admin_approve(&order.id, &admin()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn price_negotiation_holds_the_order_until_resolved() {
		let engine = engine();
		let order = engine
			.create_order(&customer(), deposit_draft())
			.await
			.unwrap();
		let id = order.id.clone();

		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();

		engine
			.propose_price(&id, &customer(), Decimal::from(300))
			.await
			.unwrap();

		// Held at admin_approved until the seller decides
		let deadline = Utc::now() + Duration::days(3);
		let err = engine
			.seller_approve(&id, &seller(), "Atelier 5", deadline)
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));

		// Approval rewrites the total and unblocks the seller
		let order = engine.approve_price(&id, &seller()).await.unwrap();
		assert_eq!(order.total_price, Decimal::from(300));
		let order = engine
			.seller_approve(&id, &seller(), "Atelier 5", deadline)
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::SellerApproved);
	}

	#[tokio::test]
	async fn price_rejection_cancels_atomically() {
		let engine = engine();
		let order = engine
			.create_order(&customer(), deposit_draft())
			.await
			.unwrap();
		let id = order.id.clone();

		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();
		engine
			.propose_price(&id, &customer(), Decimal::from(300))
			.await
			.unwrap();

		let order = engine.reject_price(&id, &seller()).await.unwrap();

		// Rejected and cancelled in the same write; never
		// rejected-but-live
		assert_eq!(order.status, OrderStatus::Cancelled);
		assert_eq!(
			order.price_approval_status,
			Some(fulfillment_types::PriceApprovalStatus::Rejected)
		);
		assert!(order.cancelled_at.is_some());

		let view = engine.get_order(&id).await.unwrap();
		assert_eq!(view.order.status, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn proposals_on_goods_orders_are_refused() {
		let engine = engine();
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		let id = order.id.clone();

		engine
			.submit_payment(
				&id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();

		let err = engine
			.propose_price(&id, &customer(), Decimal::from(50))
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn deadlines_must_be_in_the_future() {
		let engine = engine();
		let order = engine
			.create_order(&customer(), deposit_draft())
			.await
			.unwrap();
		let id = order.id.clone();

		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();

		let err = engine
			.seller_approve(&id, &seller(), "Atelier 5", Utc::now() - Duration::hours(1))
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::Validation(_)));
	}

	#[tokio::test]
	async fn deposit_exceeding_total_is_rejected_at_checkout() {
		let engine = engine();
		let mut draft = deposit_draft();
		draft.deposit_amount = Some(Decimal::from(400));

		let err = engine.create_order(&customer(), draft).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::Validation(_)));
	}

	#[tokio::test]
	async fn unknown_city_is_rejected_at_checkout() {
		let engine = engine();
		let mut draft = goods_draft();
		draft.city = "atlantis".into();

		let err = engine.create_order(&customer(), draft).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::Validation(_)));
	}

	#[tokio::test]
	async fn cancellation_is_blocked_once_production_starts() {
		let engine = engine();
		let order = engine
			.create_order(&customer(), deposit_draft())
			.await
			.unwrap();
		let id = order.id.clone();

		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();

		// Customer may still cancel here
		assert!(engine
			.permitted_actions(&id, ActorRole::Customer)
			.await
			.unwrap()
			.contains(&OrderAction::Cancel));

		engine
			.seller_approve(&id, &seller(), "Atelier 5", Utc::now() + Duration::days(2))
			.await
			.unwrap();
		engine.start_work(&id, &seller()).await.unwrap();

		for actor in [customer(), seller(), admin()] {
			let err = engine.cancel(&id, &actor, None).await.unwrap_err();
			assert!(
				matches!(err, FulfillmentError::InvalidTransition(_)),
				"{} should not cancel in production",
				actor.role
			);
		}
	}

	#[tokio::test]
	async fn suspension_keeps_the_order_assigned_and_open() {
		let engine = engine();
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		let id = order.id.clone();

		engine
			.submit_payment(
				&id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		engine.verify_payment(&id, &admin()).await.unwrap();
		engine.admin_approve(&id, &admin()).await.unwrap();
		engine
			.seller_approve(&id, &seller(), "Atelier 5", Utc::now() + Duration::days(2))
			.await
			.unwrap();
		engine.start_work(&id, &seller()).await.unwrap();
		engine.complete_work(&id, &seller()).await.unwrap();
		engine.assign_courier(&id, &admin(), "d1").await.unwrap();
		engine.pickup(&id, &courier()).await.unwrap();

		let order = engine
			.suspend(&id, &courier(), "لم يرد العميل")
			.await
			.unwrap();

		assert_eq!(order.status, OrderStatus::Suspended);
		assert!(order.suspended_at.is_some());
		assert_eq!(order.courier_id.as_deref(), Some("d1"));
		assert!(order.cancelled_at.is_none());
	}

	#[tokio::test]
	async fn stale_writers_get_a_conflict_and_nothing_applies_twice() {
		let engine = engine();
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		let id = order.id.clone();

		// Two actors read the same version; the second commit must fail
		let (mut a, version) = engine.machine.get_order(&id).await.unwrap();
		let (mut b, same_version) = engine.machine.get_order(&id).await.unwrap();
		assert_eq!(version, same_version);

		a.status = OrderStatus::Cancelled;
		engine.machine.commit(&a, version).await.unwrap();

		b.status = OrderStatus::AdminApproved;
		let err = engine.machine.commit(&b, same_version).await.unwrap_err();
		assert!(matches!(
			err,
			FulfillmentError::ConcurrentModification { .. }
		));

		let view = engine.get_order(&id).await.unwrap();
		assert_eq!(view.order.status, OrderStatus::Cancelled);
	}

	#[tokio::test]
	async fn racing_transitions_have_exactly_one_winner() {
		let engine = Arc::new(engine());
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		engine
			.submit_payment(
				&order.id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		engine.verify_payment(&order.id, &admin()).await.unwrap();

		let approve = {
			let engine = engine.clone();
			let id = order.id.clone();
			tokio::spawn(async move { engine.admin_approve(&id, &admin()).await })
		};
		let also_approve = {
			let engine = engine.clone();
			let id = order.id.clone();
			tokio::spawn(async move { engine.admin_approve(&id, &admin()).await })
		};

		let (a, b) = (approve.await.unwrap(), also_approve.await.unwrap());
		let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
		assert_eq!(successes, 1, "exactly one approval may win");

		let view = engine.get_order(&order.id).await.unwrap();
		assert_eq!(view.order.status, OrderStatus::AdminApproved);
	}

	#[tokio::test]
	async fn reads_flip_and_persist_lateness_exactly_once() {
		let engine = engine();

		// Seed an in-production order whose deadline has passed
		let mut order = order_in(OrderStatus::InProgress);
		order.completion_deadline = Some(Utc::now() - Duration::hours(2));
		engine.machine.insert_order(&order).await.unwrap();

		let mut events = engine.event_bus().subscribe();

		let view = engine.get_order(&order.id).await.unwrap();
		assert!(view.order.is_late);
		assert_eq!(
			view.remaining_time,
			Some(RemainingTime {
				days: 0,
				hours: 0,
				overdue: true
			})
		);

		// The flip was persisted and announced
		let persisted = engine.get_order(&order.id).await.unwrap();
		assert!(persisted.order.is_late);
		let late_entries = persisted
			.order
			.timeline
			.iter()
			.filter(|e| e.label == "production deadline exceeded")
			.count();
		assert_eq!(late_entries, 1);

		let mut saw_deadline_event = 0;
		while let Ok(event) = events.try_recv() {
			if matches!(
				event,
				FulfillmentEvent::Deadline(DeadlineNotification::DeadlineExceeded { .. })
			) {
				saw_deadline_event += 1;
			}
		}
		assert_eq!(saw_deadline_event, 1);
	}

	#[tokio::test]
	async fn transitions_publish_notification_events() {
		let engine = engine();
		let mut events = engine.event_bus().subscribe();

		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();
		engine
			.submit_payment(
				&order.id,
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/full.jpg".into()),
			)
			.await
			.unwrap();
		engine.verify_payment(&order.id, &admin()).await.unwrap();
		engine.admin_approve(&order.id, &admin()).await.unwrap();

		let mut saw_created = false;
		let mut saw_submitted = false;
		let mut saw_verified = false;
		let mut saw_status_change = false;
		while let Ok(event) = events.try_recv() {
			match event {
				FulfillmentEvent::Order(OrderNotification::Created { .. }) => {
					saw_created = true;
				},
				FulfillmentEvent::Payment(PaymentNotification::ProofSubmitted { .. }) => {
					saw_submitted = true;
				},
				FulfillmentEvent::Payment(PaymentNotification::PaymentVerified { .. }) => {
					saw_verified = true;
				},
				FulfillmentEvent::Order(OrderNotification::StatusChanged { from, to, .. }) => {
					assert_eq!(from, OrderStatus::Pending);
					assert_eq!(to, OrderStatus::AdminApproved);
					saw_status_change = true;
				},
				_ => {},
			}
		}
		assert!(saw_created && saw_submitted && saw_verified && saw_status_change);
	}

	#[tokio::test]
	async fn unknown_orders_surface_not_found() {
		let engine = engine();

		let err = engine.get_order("missing").await.unwrap_err();
		assert!(matches!(err, FulfillmentError::NotFound(_)));

		let err = engine.admin_approve("missing", &admin()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::NotFound(_)));
	}

	#[tokio::test]
	async fn permitted_actions_follow_the_lifecycle() {
		let engine = engine();
		let order = engine.create_order(&customer(), goods_draft()).await.unwrap();

		let actions = engine
			.permitted_actions(&order.id, ActorRole::Customer)
			.await
			.unwrap();
		assert!(actions.contains(&OrderAction::Cancel));
		assert!(actions.contains(&OrderAction::SubmitFullPayment));
		assert!(!actions.contains(&OrderAction::ConfirmReceipt));

		let courier_actions = engine
			.permitted_actions(&order.id, ActorRole::Courier)
			.await
			.unwrap();
		assert!(courier_actions.is_empty());
	}
}
