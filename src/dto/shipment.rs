use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dates;
use crate::models::ShipmentStatus;

/// Driver columns embedded by the backend's foreign-key join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEmbed {
    pub id: Uuid,
    pub nama: String,
    #[serde(default)]
    pub plat_nomor: Option<String>,
}

/// A row of the `pengiriman` table as persisted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub id: Uuid,
    pub no_surat_jalan: String,
    pub perusahaan: String,
    pub tujuan: String,
    #[serde(default)]
    pub supir_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supir: Option<DriverEmbed>,
    #[serde(deserialize_with = "dates::calendar_date")]
    pub tanggal_kirim: NaiveDate,
    #[serde(default, deserialize_with = "dates::optional_calendar_date")]
    pub tanggal_tiba: Option<NaiveDate>,
    #[serde(default, deserialize_with = "dates::optional_time_of_day")]
    pub waktu_tiba: Option<NaiveTime>,
    pub status: ShipmentStatus,
    #[serde(default)]
    pub kendala: Option<String>,
    pub qty: u32,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default)]
    pub current_lat: Option<f64>,
    #[serde(default)]
    pub current_lng: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// Partial row for inserts and updates.
///
/// `None` leaves a column untouched; for nullable columns `Some(None)` writes
/// an explicit null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShipmentRecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_surat_jalan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perusahaan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tujuan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supir_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tanggal_kirim: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tanggal_tiba: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waktu_tiba: Option<Option<NaiveTime>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ShipmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kendala: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_lat: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_lng: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Option<String>>,
}

impl ShipmentRecordPatch {
    /// Overlays the present columns of this patch onto `record`.
    pub fn merge_into(&self, record: &mut ShipmentRecord) {
        if let Some(v) = &self.no_surat_jalan {
            record.no_surat_jalan = v.clone();
        }
        if let Some(v) = &self.perusahaan {
            record.perusahaan = v.clone();
        }
        if let Some(v) = &self.tujuan {
            record.tujuan = v.clone();
        }
        if let Some(v) = self.supir_id {
            if v != record.supir_id {
                record.supir = None;
            }
            record.supir_id = v;
        }
        if let Some(v) = self.tanggal_kirim {
            record.tanggal_kirim = v;
        }
        if let Some(v) = self.tanggal_tiba {
            record.tanggal_tiba = v;
        }
        if let Some(v) = self.waktu_tiba {
            record.waktu_tiba = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = &self.kendala {
            record.kendala = v.clone();
        }
        if let Some(v) = self.qty {
            record.qty = v;
        }
        if let Some(v) = &self.tracking_url {
            record.tracking_url = v.clone();
        }
        if let Some(v) = self.current_lat {
            record.current_lat = v;
        }
        if let Some(v) = self.current_lng {
            record.current_lng = v;
        }
        if let Some(v) = &self.updated_by {
            record.updated_by = v.clone();
        }
    }

    /// Builds a complete row from an insert patch, or reports the first
    /// missing required column.
    pub fn into_record(self, id: Uuid, now: DateTime<Utc>) -> Result<ShipmentRecord, &'static str> {
        let mut record = ShipmentRecord {
            id,
            no_surat_jalan: self.no_surat_jalan.clone().ok_or("no_surat_jalan")?,
            perusahaan: self.perusahaan.clone().ok_or("perusahaan")?,
            tujuan: self.tujuan.clone().unwrap_or_default(),
            supir_id: None,
            supir: None,
            tanggal_kirim: self.tanggal_kirim.ok_or("tanggal_kirim")?,
            tanggal_tiba: None,
            waktu_tiba: None,
            status: self.status.unwrap_or(ShipmentStatus::Pending),
            kendala: None,
            qty: self.qty.unwrap_or_default(),
            tracking_url: None,
            current_lat: None,
            current_lng: None,
            created_at: Some(now),
            updated_at: Some(now),
            updated_by: None,
        };
        self.merge_into(&mut record);
        Ok(record)
    }
}
