//! Record change events and the channels that carry them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod projection;

pub use bus::{EventBus, Subscription, SubscriptionHandle};
pub use event::{RecordAction, RecordEvent};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use projection::Projection;
