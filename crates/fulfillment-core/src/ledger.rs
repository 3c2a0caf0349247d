//! Payment ledger: full, deposit, and remaining-balance proofs.
//!
//! Three independent payment facts are tracked per order. Customers
//! submit proof references; only administrators verify them, and
//! verification is what unlocks admin approval. The remaining-balance
//! proof is special: it is accepted anywhere between admin approval and
//! delivery, and it flips the order's payment review back to pending
//! without touching the status, because production and delivery may
//! legitimately proceed before full settlement.

use chrono::{DateTime, Utc};
use fulfillment_types::{
	Actor, DepositStatus, FulfillmentEvent, Order, OrderAction, PaymentKind, PaymentNotification,
	PaymentProof, PaymentReview, ProofReference,
};
use std::sync::Arc;
use tracing::instrument;

use crate::state::OrderStateMachine;
use crate::FulfillmentError;

/// Tracks and verifies the payments attached to an order.
pub struct PaymentLedger {
	machine: Arc<OrderStateMachine>,
}

impl PaymentLedger {
	pub fn new(machine: Arc<OrderStateMachine>) -> Self {
		Self { machine }
	}

	/// Submits a payment proof of the given kind for the order.
	///
	/// Resubmission replaces a prior unverified proof of the same kind
	/// but never a verified one.
	#[instrument(skip_all, fields(order_id = %order_id, kind = %kind))]
	pub async fn submit_proof(
		&self,
		order_id: &str,
		actor: &Actor,
		kind: PaymentKind,
		proof: ProofReference,
	) -> Result<Order, FulfillmentError> {
		let action = match kind {
			PaymentKind::Full => OrderAction::SubmitFullPayment,
			PaymentKind::Deposit => OrderAction::SubmitDepositPayment,
			PaymentKind::Remaining => OrderAction::SubmitRemainingPayment,
		};

		self.machine
			.apply(order_id, actor, action, |order, now| {
				match kind {
					PaymentKind::Full => Self::attach_full(order, proof, now)?,
					PaymentKind::Deposit => Self::attach_deposit(order, proof, now)?,
					PaymentKind::Remaining => Self::attach_remaining(order, proof, now)?,
				}

				order.payment_review = PaymentReview::Pending;
				order.record(
					match kind {
						PaymentKind::Full => "full payment proof submitted",
						PaymentKind::Deposit => "deposit proof submitted",
						PaymentKind::Remaining => "remaining payment proof submitted",
					},
					actor.role,
					None,
					now,
				);

				Ok(vec![FulfillmentEvent::Payment(
					PaymentNotification::ProofSubmitted {
						order_id: order.id.clone(),
						kind,
					},
				)])
			})
			.await
	}

	fn attach_full(
		order: &mut Order,
		proof: ProofReference,
		now: DateTime<Utc>,
	) -> Result<(), FulfillmentError> {
		if order.requires_deposit {
			return Err(FulfillmentError::InvalidTransition(
				"order uses the deposit flow; submit a deposit proof instead".into(),
			));
		}
		if order
			.full_payment
			.as_ref()
			.is_some_and(PaymentProof::is_verified)
		{
			return Err(FulfillmentError::InvalidTransition(
				"a verified full payment is already on file".into(),
			));
		}

		order.full_payment = Some(PaymentProof {
			kind: PaymentKind::Full,
			proof,
			submitted_at: now,
			verified_at: None,
		});
		Ok(())
	}

	fn attach_deposit(
		order: &mut Order,
		proof: ProofReference,
		now: DateTime<Utc>,
	) -> Result<(), FulfillmentError> {
		if !order.requires_deposit {
			return Err(FulfillmentError::InvalidTransition(
				"order does not require a deposit".into(),
			));
		}
		if order.deposit_status == DepositStatus::Paid {
			return Err(FulfillmentError::InvalidTransition(
				"deposit has already been confirmed and is immutable".into(),
			));
		}

		order.deposit_payment = Some(PaymentProof {
			kind: PaymentKind::Deposit,
			proof,
			submitted_at: now,
			verified_at: None,
		});
		Ok(())
	}

	fn attach_remaining(
		order: &mut Order,
		proof: ProofReference,
		now: DateTime<Utc>,
	) -> Result<(), FulfillmentError> {
		if !order.requires_deposit {
			return Err(FulfillmentError::InvalidTransition(
				"order has no remaining balance; it is paid in full upfront".into(),
			));
		}
		if order.deposit_status != DepositStatus::Paid {
			return Err(FulfillmentError::InvalidTransition(
				"deposit has not been confirmed yet".into(),
			));
		}
		if order
			.remaining_payment
			.as_ref()
			.is_some_and(PaymentProof::is_verified)
		{
			return Err(FulfillmentError::InvalidTransition(
				"a verified remaining payment is already on file".into(),
			));
		}

		order.remaining_payment = Some(PaymentProof {
			kind: PaymentKind::Remaining,
			proof,
			submitted_at: now,
			verified_at: None,
		});
		Ok(())
	}

	/// Administrator verification of whichever proof is awaiting
	/// review. This is the only path that confirms a deposit and the
	/// only role that may mark any payment as verified.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn verify_payment(
		&self,
		order_id: &str,
		actor: &Actor,
	) -> Result<Order, FulfillmentError> {
		self.machine
			.apply(order_id, actor, OrderAction::VerifyPayment, |order, now| {
				let kind = Self::verify_pending_proof(order, now)?;

				if kind == PaymentKind::Deposit {
					order.deposit_status = DepositStatus::Paid;
				}
				order.payment_review = PaymentReview::Verified;
				order.record(
					"payment verified by administration",
					actor.role,
					Some(kind.to_string()),
					now,
				);

				Ok(vec![FulfillmentEvent::Payment(
					PaymentNotification::PaymentVerified {
						order_id: order.id.clone(),
						kind,
					},
				)])
			})
			.await
	}

	/// Marks the unverified submitted proof as verified, returning its
	/// kind. Errors when nothing is awaiting review.
	fn verify_pending_proof(
		order: &mut Order,
		now: DateTime<Utc>,
	) -> Result<PaymentKind, FulfillmentError> {
		let pending = [
			order.full_payment.as_mut(),
			order.deposit_payment.as_mut(),
			order.remaining_payment.as_mut(),
		]
		.into_iter()
		.flatten()
		.find(|proof| !proof.is_verified());

		match pending {
			Some(proof) => {
				proof.verified_at = Some(now);
				Ok(proof.kind)
			},
			None => Err(FulfillmentError::InvalidTransition(
				"no payment proof awaiting verification".into(),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::event_bus::EventBus;
	use crate::testing::{order_in, service_order_in};
	use fulfillment_storage::{implementations::memory::MemoryStorage, StorageService};
	use fulfillment_types::{ActorRole, OrderStatus};
	use rust_decimal::Decimal;

	async fn ledger_with(order: Order) -> (PaymentLedger, Arc<OrderStateMachine>) {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let machine = Arc::new(OrderStateMachine::new(storage, EventBus::new(16)));
		machine.insert_order(&order).await.unwrap();
		(PaymentLedger::new(machine.clone()), machine)
	}

	fn customer() -> Actor {
		Actor::new("c1", ActorRole::Customer)
	}

	fn admin() -> Actor {
		Actor::new("a1", ActorRole::Administrator)
	}

	#[tokio::test]
	async fn full_proof_can_be_replaced_until_verified() {
		let (ledger, _) = ledger_with(order_in(OrderStatus::Pending)).await;

		ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/1.jpg".into()),
			)
			.await
			.unwrap();

		// Unverified proof is replaced wholesale
		let order = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/2.jpg".into()),
			)
			.await
			.unwrap();
		assert_eq!(
			order.full_payment.as_ref().unwrap().proof.as_str(),
			"receipts/2.jpg"
		);
		assert_eq!(order.payment_review, PaymentReview::Pending);

		// Once verified, replacement is refused
		ledger.verify_payment("order-1", &admin()).await.unwrap();
		let err = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/3.jpg".into()),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn full_proof_is_refused_on_deposit_orders() {
		let (ledger, _) =
			ledger_with(service_order_in(OrderStatus::Pending, Decimal::from(30))).await;

		let err = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/1.jpg".into()),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn deposit_confirmation_is_immutable() {
		let (ledger, _) =
			ledger_with(service_order_in(OrderStatus::Pending, Decimal::from(30))).await;

		ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Deposit,
				ProofReference("receipts/dep.jpg".into()),
			)
			.await
			.unwrap();
		let order = ledger.verify_payment("order-1", &admin()).await.unwrap();
		assert_eq!(order.deposit_status, DepositStatus::Paid);

		// No further deposit submissions once confirmed
		let err = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Deposit,
				ProofReference("receipts/dep2.jpg".into()),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn remaining_proof_reverts_review_without_touching_status() {
		let mut order = service_order_in(OrderStatus::InProgress, Decimal::from(105));
		order.deposit_status = DepositStatus::Paid;
		order.payment_review = PaymentReview::Verified;
		let (ledger, _) = ledger_with(order).await;

		let order = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Remaining,
				ProofReference("receipts/rest.jpg".into()),
			)
			.await
			.unwrap();

		assert_eq!(order.status, OrderStatus::InProgress);
		assert_eq!(order.payment_review, PaymentReview::Pending);
		assert!(order.remaining_payment.is_some());
	}

	#[tokio::test]
	async fn remaining_proof_requires_a_confirmed_deposit() {
		let (ledger, _) =
			ledger_with(service_order_in(OrderStatus::AdminApproved, Decimal::from(30))).await;

		let err = ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Remaining,
				ProofReference("receipts/rest.jpg".into()),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn verification_with_nothing_pending_is_rejected() {
		let (ledger, _) = ledger_with(order_in(OrderStatus::Pending)).await;

		let err = ledger.verify_payment("order-1", &admin()).await.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}

	#[tokio::test]
	async fn only_administrators_may_verify() {
		let (ledger, _) = ledger_with(order_in(OrderStatus::Pending)).await;

		ledger
			.submit_proof(
				"order-1",
				&customer(),
				PaymentKind::Full,
				ProofReference("receipts/1.jpg".into()),
			)
			.await
			.unwrap();

		let err = ledger
			.verify_payment("order-1", &customer())
			.await
			.unwrap_err();
		assert!(matches!(err, FulfillmentError::InvalidTransition(_)));
	}
}
