use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A driver that shipments can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub license_plate: String,
    /// Login account linked to this driver, if any.
    pub user_id: Option<Uuid>,
    pub phone: Option<String>,
}
