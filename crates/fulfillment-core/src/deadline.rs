//! Completion-deadline tracking.
//!
//! The deadline is set exactly once, by the seller, when accepting the
//! order. Lateness is evaluated lazily whenever the order is read while
//! production is active; there is no background scheduler. The flag is
//! sticky and the evaluation is idempotent, so repeated reads after the
//! flip are no-ops. Remaining time for display is derived, never stored.

use chrono::{DateTime, Duration, Utc};
use fulfillment_types::{Order, OrderStatus, RemainingTime};

use crate::FulfillmentError;

/// Statuses during which the deadline clock is running.
fn deadline_applies(status: OrderStatus) -> bool {
	matches!(
		status,
		OrderStatus::SellerApproved | OrderStatus::InProgress
	)
}

/// Computes and maintains deadline state for orders in production.
pub struct DeadlineTracker;

impl DeadlineTracker {
	/// Rejects deadlines that are not strictly in the future at the
	/// moment the seller commits to them.
	pub fn validate_deadline(
		deadline: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<(), FulfillmentError> {
		if deadline <= now {
			return Err(FulfillmentError::Validation(
				"completion deadline must be in the future".into(),
			));
		}
		Ok(())
	}

	/// Lazily evaluates lateness at read time.
	///
	/// Flips `is_late` and appends one timeline entry the first time
	/// the deadline is observed to have passed while the order is still
	/// in production. Returns whether the flag flipped so the caller
	/// can persist the change and publish the notification. An order in
	/// an active status with no readable deadline is logged and treated
	/// as not late; understating lateness is the safer default.
	pub fn evaluate(order: &mut Order, now: DateTime<Utc>) -> bool {
		if order.is_late || !deadline_applies(order.status) {
			return false;
		}

		let deadline = match order.completion_deadline {
			Some(deadline) => deadline,
			None => {
				tracing::warn!(
					order_id = %order.id,
					status = %order.status,
					"Order in production has no completion deadline; treating as not late"
				);
				return false;
			},
		};

		if now <= deadline {
			return false;
		}

		order.is_late = true;
		order.record_system("production deadline exceeded", None, now);
		true
	}

	/// Derives the remaining time until the deadline, decomposed into
	/// whole days and remainder hours. `None` outside active
	/// production or when no deadline is set.
	pub fn remaining(order: &Order, now: DateTime<Utc>) -> Option<RemainingTime> {
		if !deadline_applies(order.status) {
			return None;
		}
		let deadline = order.completion_deadline?;

		let left: Duration = deadline - now;
		if left <= Duration::zero() {
			return Some(RemainingTime {
				days: 0,
				hours: 0,
				overdue: true,
			});
		}

		Some(RemainingTime {
			days: left.num_days(),
			hours: left.num_hours() % 24,
			overdue: false,
		})
	}
}
