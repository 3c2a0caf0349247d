//! Order state management.
//!
//! Contains the state machine that owns every status transition,
//! including the price-negotiation sub-state.

pub mod machine;

pub use machine::OrderStateMachine;
