use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ShipmentStatus;

/// A row of the append-only `status_history` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryRecord {
    pub id: Uuid,
    pub pengiriman_id: Uuid,
    #[serde(default)]
    pub status_lama: Option<ShipmentStatus>,
    pub status_baru: ShipmentStatus,
    #[serde(default)]
    pub catatan: Option<String>,
    #[serde(default)]
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStatusHistoryRecord {
    pub pengiriman_id: Uuid,
    pub status_lama: Option<ShipmentStatus>,
    pub status_baru: ShipmentStatus,
    pub catatan: Option<String>,
    pub changed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
