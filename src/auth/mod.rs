//! Role-based authorization for shipment and forum operations.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Note, Shipment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
}

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    CreateShipment,
    UpdateStatus,
    ReassignDriver,
    EditQuantity,
    EditTrackingUrl,
    DeleteShipment,
    PostNote,
    PushLocation,
    ManageDrivers,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
    /// Driver record linked to this account, for drivers.
    pub driver_id: Option<Uuid>,
}

impl Actor {
    pub fn admin(display_name: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: display_name.into(),
            role: Role::Admin,
            driver_id: None,
        }
    }

    pub fn driver(display_name: impl Into<String>, driver_id: Uuid) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: display_name.into(),
            role: Role::Driver,
            driver_id: Some(driver_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn is_assigned(&self, shipment: Option<&Shipment>) -> bool {
        match (self.driver_id, shipment.and_then(|s| s.driver_id)) {
            (Some(mine), Some(assigned)) => mine == assigned,
            _ => false,
        }
    }

    /// Whether this actor may perform `action`, optionally on `shipment`.
    pub fn can(&self, action: Action, shipment: Option<&Shipment>) -> bool {
        if self.is_admin() {
            return true;
        }
        match action {
            Action::UpdateStatus | Action::PushLocation => self.is_assigned(shipment),
            // Forum messages without a shipment are open to every driver.
            Action::PostNote => shipment.is_none() || self.is_assigned(shipment),
            Action::CreateShipment
            | Action::ReassignDriver
            | Action::EditQuantity
            | Action::EditTrackingUrl
            | Action::DeleteShipment
            | Action::ManageDrivers => false,
        }
    }

    pub fn authorize(&self, action: Action, shipment: Option<&Shipment>) -> Result<(), ServiceError> {
        if self.can(action, shipment) {
            return Ok(());
        }
        warn!(user_id = %self.user_id, %action, "action forbidden");
        Err(ServiceError::Forbidden(format!(
            "{} is not allowed to {}",
            self.display_name,
            action.to_string().replace('_', " ")
        )))
    }

    /// Notes can be edited or deleted by their author and by admins.
    pub fn authorize_note_change(&self, note: &Note) -> Result<(), ServiceError> {
        if self.is_admin() || note.user_id == Some(self.user_id) {
            return Ok(());
        }
        warn!(user_id = %self.user_id, note_id = %note.id, "note change forbidden");
        Err(ServiceError::Forbidden(
            "Only the author can change this message".to_string(),
        ))
    }
}
