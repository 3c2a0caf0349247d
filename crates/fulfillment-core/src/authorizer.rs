//! Role authorization for order transitions.
//!
//! The marketplace's permission rules live in one static table mapping
//! `(role, current status)` to the set of permitted actions, consulted
//! before every transition. Screens render their buttons from the same
//! table through the read model, so UI and engine can never disagree.

use fulfillment_types::{Actor, ActorRole, Order, OrderAction, OrderStatus};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::FulfillmentError;

/// Static authorization table.
///
/// Rows absent from the table mean "nothing permitted". Cancellation
/// windows: customers may cancel until the seller commits a deadline,
/// sellers and administrators until production starts.
static PERMITTED: Lazy<HashMap<(ActorRole, OrderStatus), HashSet<OrderAction>>> =
	Lazy::new(|| {
		use ActorRole::*;
		use OrderAction::*;
		use OrderStatus::*;

		let mut m: HashMap<(ActorRole, OrderStatus), HashSet<OrderAction>> = HashMap::new();
		let mut permit = |role: ActorRole, status: OrderStatus, actions: &[OrderAction]| {
			m.insert((role, status), actions.iter().copied().collect());
		};

		// Customer
		permit(
			Customer,
			Pending,
			&[Cancel, SubmitFullPayment, SubmitDepositPayment],
		);
		permit(
			Customer,
			AdminApproved,
			&[Cancel, ProposePrice, SubmitRemainingPayment],
		);
		permit(Customer, SellerApproved, &[SubmitRemainingPayment]);
		permit(Customer, InProgress, &[SubmitRemainingPayment]);
		permit(Customer, ReadyForDelivery, &[SubmitRemainingPayment]);
		permit(Customer, OutForDelivery, &[SubmitRemainingPayment]);
		permit(
			Customer,
			Delivered,
			&[ConfirmReceipt, SubmitRemainingPayment],
		);

		// Seller
		permit(
			Seller,
			AdminApproved,
			&[SellerApprove, ApprovePrice, RejectPrice, Cancel],
		);
		permit(Seller, SellerApproved, &[StartWork, Cancel]);
		permit(Seller, InProgress, &[CompleteWork]);

		// Administrator
		permit(Administrator, Pending, &[VerifyPayment, AdminApprove, Cancel]);
		permit(Administrator, AdminApproved, &[VerifyPayment, Cancel]);
		permit(Administrator, SellerApproved, &[VerifyPayment, Cancel]);
		permit(Administrator, InProgress, &[VerifyPayment, AssignCourier]);
		permit(
			Administrator,
			ReadyForDelivery,
			&[VerifyPayment, AssignCourier],
		);
		permit(Administrator, OutForDelivery, &[VerifyPayment]);
		permit(Administrator, Delivered, &[VerifyPayment]);

		// Courier
		permit(Courier, ReadyForDelivery, &[Pickup]);
		permit(Courier, OutForDelivery, &[Deliver, Suspend]);

		m
	});

static EMPTY: Lazy<HashSet<OrderAction>> = Lazy::new(HashSet::new);

/// Decides which transitions each role may attempt in each status.
pub struct RoleAuthorizer;

impl RoleAuthorizer {
	/// Returns the actions the role may take while the order is in the
	/// given status.
	pub fn permitted_actions(role: ActorRole, status: OrderStatus) -> &'static HashSet<OrderAction> {
		PERMITTED.get(&(role, status)).unwrap_or(&EMPTY)
	}

	/// Checks that the role may take the action in the given status.
	pub fn authorize(
		role: ActorRole,
		status: OrderStatus,
		action: OrderAction,
	) -> Result<(), FulfillmentError> {
		if Self::permitted_actions(role, status).contains(&action) {
			Ok(())
		} else {
			Err(FulfillmentError::InvalidTransition(format!(
				"{} may not {} while order is {}",
				role, action, status
			)))
		}
	}

	/// Checks that the actor is the party the order binds for their
	/// role. Administrators act on any order; customers, sellers, and
	/// couriers only on their own.
	pub fn ensure_actor_binding(actor: &Actor, order: &Order) -> Result<(), FulfillmentError> {
		let bound = match actor.role {
			ActorRole::Administrator => true,
			ActorRole::Customer => actor.id == order.customer_id,
			ActorRole::Seller => actor.id == order.seller_id,
			ActorRole::Courier => order.courier_id.as_deref() == Some(actor.id.as_str()),
		};

		if bound {
			Ok(())
		} else {
			Err(FulfillmentError::InvalidTransition(format!(
				"{} {} is not a party to order {}",
				actor.role, actor.id, order.id
			)))
		}
	}
}
