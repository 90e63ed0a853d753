//! Realtime synchronization of the local shipment collection.

pub mod reconciler;
pub mod store;

pub use reconciler::{RealtimeHandle, Reconciler, SubscriptionState};
pub use store::{FetchTicket, ShipmentStore, ShipmentView};
