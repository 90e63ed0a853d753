pub mod drivers;
pub mod notes;
pub mod reports;
pub mod shipments;

pub use drivers::DriverService;
pub use notes::NoteService;
pub use reports::{export_csv, ReportService, ShipmentReport};
pub use shipments::{CreateShipmentInput, ShipmentService};
