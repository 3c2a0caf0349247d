//! Broadcast bus for notification events.
//!
//! The engine publishes one event per committed transition; an external
//! notifier subscribes and handles delivery. Publishing never blocks
//! and succeeds trivially when nobody is listening, so notification
//! fan-out can never hold up a transition.

use fulfillment_types::FulfillmentEvent;
use tokio::sync::broadcast;

/// Cloneable handle to the engine's broadcast channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<FulfillmentEvent>,
}

impl EventBus {
	/// Creates a bus retaining up to `capacity` undelivered events per
	/// subscriber before older ones are dropped.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Publishes an event to all current subscribers. The error case
	/// (no subscribers) is routinely ignored by callers.
	pub fn publish(
		&self,
		event: FulfillmentEvent,
	) -> Result<usize, broadcast::error::SendError<FulfillmentEvent>> {
		self.sender.send(event)
	}

	/// Subscribes to all events published after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<FulfillmentEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(256)
	}
}
