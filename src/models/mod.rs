pub mod driver;
pub mod note;
pub mod shipment;
pub mod shipment_history;

pub use driver::Driver;
pub use note::{NewNote, Note};
pub use shipment::{Shipment, ShipmentPatch, ShipmentStatus, StatusChange};
pub use shipment_history::{NewStatusHistory, StatusHistoryEntry};
