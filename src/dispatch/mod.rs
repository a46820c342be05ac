pub mod observers;
pub mod queue;

pub use observers::{ObserverList, SubscriptionId};
pub use queue::{EventDispatchQueue, PendingAction, ValueChangedCallback, ValueRemovedCallback};
