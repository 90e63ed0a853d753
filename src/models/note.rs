use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A forum message, optionally attached to a shipment's issue thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    pub author_name: String,
    pub body: String,
    pub image_url: Option<String>,
    pub user_id: Option<Uuid>,
    pub shipment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for posting a message.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    #[validate(length(
        min = 1,
        max = 4000,
        message = "Message must be between 1 and 4000 characters"
    ))]
    pub body: String,

    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,

    pub shipment_id: Option<Uuid>,
}
