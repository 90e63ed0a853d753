use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row of the `supir` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: Uuid,
    pub nama: String,
    #[serde(default)]
    pub plat_nomor: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub no_hp: Option<String>,
}
