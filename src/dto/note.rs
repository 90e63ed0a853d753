use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of the `diskusi` forum table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: Uuid,
    pub nama_pengirim: String,
    pub pesan: String,
    #[serde(default)]
    pub gambar_url: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub pengiriman_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewNoteRecord {
    pub nama_pengirim: String,
    pub pesan: String,
    pub gambar_url: Option<String>,
    pub user_id: Option<Uuid>,
    pub pengiriman_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoteRecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pesan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gambar_url: Option<Option<String>>,
}
