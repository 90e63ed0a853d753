use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::shipment::ShipmentStatus;

/// Write-once audit record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub shipment_id: Uuid,
    /// `None` for the entry written when the shipment is created.
    pub previous_status: Option<ShipmentStatus>,
    pub new_status: ShipmentStatus,
    pub notes: Option<String>,
    pub changed_by: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// History entry before the store has assigned it an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatusHistory {
    pub shipment_id: Uuid,
    pub previous_status: Option<ShipmentStatus>,
    pub new_status: ShipmentStatus,
    pub notes: Option<String>,
    pub changed_by: Option<String>,
    pub changed_at: DateTime<Utc>,
}
