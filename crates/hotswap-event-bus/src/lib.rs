//! Event Bus System
//!
//! Type-safe publish/subscribe used to push update state snapshots to the
//! presentation layer:
//! - Subscription lifecycle management (subscribe/unsubscribe)
//! - Filtered and one-shot subscriptions
//! - Delivery statistics

pub mod core;
pub mod update_bus;

pub use self::core::{EventBus, EventBusContainer, EventBusStats, SubscriptionId};
pub use self::update_bus::{UpdateStateBusContainer, UpdateStateEvent};
