use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body accepted by the `update-location` backend function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    pub shipment_id: Uuid,
    pub lat: f64,
    pub lng: f64,
}

/// Acknowledgement returned by the `update-location` backend function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAck {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
