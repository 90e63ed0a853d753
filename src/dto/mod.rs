//! Wire representations of the hosted backend's tables.
//!
//! Field names follow the persisted snake_case columns; conversion to the
//! application models lives in [`crate::normalize`].

pub mod dates;
pub mod driver;
pub mod history;
pub mod location;
pub mod note;
pub mod shipment;

pub use driver::DriverRecord;
pub use history::{NewStatusHistoryRecord, StatusHistoryRecord};
pub use location::{LocationAck, UpdateLocationRequest};
pub use note::{NewNoteRecord, NoteRecord, NoteRecordPatch};
pub use shipment::{DriverEmbed, ShipmentRecord, ShipmentRecordPatch};
