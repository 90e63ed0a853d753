//! Mapping between the backend's wire rows and the application models.
//!
//! `to_app`/`to_wire` are pure and perform no validation; absent fields stay
//! absent. Validation happens once, at the gateway boundary, in
//! [`parse_record`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::dto::{
    DriverRecord, NewNoteRecord, NewStatusHistoryRecord, NoteRecord, ShipmentRecord,
    ShipmentRecordPatch, StatusHistoryRecord,
};
use crate::errors::ServiceError;
use crate::models::{
    Driver, NewStatusHistory, Note, Shipment, ShipmentPatch, StatusHistoryEntry,
};

pub fn to_app(record: ShipmentRecord) -> Shipment {
    Shipment {
        id: record.id,
        delivery_note_number: record.no_surat_jalan,
        company: record.perusahaan,
        destination: record.tujuan,
        driver_id: record.supir_id,
        driver_name: record.supir.map(|driver| driver.nama),
        quantity: record.qty,
        ship_date: record.tanggal_kirim,
        arrival_date: record.tanggal_tiba,
        arrival_time: record.waktu_tiba,
        status: record.status,
        issue: record.kendala,
        tracking_url: record.tracking_url,
        current_lat: record.current_lat,
        current_lng: record.current_lng,
        created_at: record.created_at,
        updated_at: record.updated_at,
        updated_by: record.updated_by,
    }
}

/// Maps a partial shipment onto the persisted columns.
///
/// The joined driver name and the audit timestamps are owned by the backend
/// and never written.
pub fn to_wire(patch: &ShipmentPatch) -> ShipmentRecordPatch {
    ShipmentRecordPatch {
        id: patch.id,
        no_surat_jalan: patch.delivery_note_number.clone(),
        perusahaan: patch.company.clone(),
        tujuan: patch.destination.clone(),
        supir_id: patch.driver_id,
        tanggal_kirim: patch.ship_date,
        tanggal_tiba: patch.arrival_date,
        waktu_tiba: patch.arrival_time,
        status: patch.status,
        kendala: patch.issue.clone(),
        qty: patch.quantity,
        tracking_url: patch.tracking_url.clone(),
        current_lat: patch.current_lat,
        current_lng: patch.current_lng,
        updated_by: patch.updated_by.clone(),
    }
}

fn record_id(value: &Value) -> Option<Uuid> {
    value
        .get("id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn parse_row<T: DeserializeOwned>(value: Value) -> Result<T, ServiceError> {
    let id = record_id(&value);
    if id.is_none() {
        return Err(ServiceError::MalformedRecord {
            id: None,
            reason: "missing or invalid id".to_string(),
        });
    }
    serde_json::from_value(value).map_err(|e| ServiceError::MalformedRecord {
        id,
        reason: e.to_string(),
    })
}

/// Validated parse of a raw shipment row.
///
/// Rejects rows without an identifier, delivery-note number, company,
/// destination, quantity, ship date or status, and rows with an unknown
/// status or negative quantity.
pub fn parse_record(value: Value) -> Result<ShipmentRecord, ServiceError> {
    let record: ShipmentRecord = parse_row(value)?;
    if record.no_surat_jalan.trim().is_empty() {
        return Err(ServiceError::MalformedRecord {
            id: Some(record.id),
            reason: "empty delivery note number".to_string(),
        });
    }
    if record.perusahaan.trim().is_empty() {
        return Err(ServiceError::MalformedRecord {
            id: Some(record.id),
            reason: "empty company".to_string(),
        });
    }
    Ok(record)
}

/// Parses a list response, dropping (and logging) rows that fail validation.
pub fn parse_rows<T, F>(values: Vec<Value>, parse: F) -> Vec<T>
where
    F: Fn(Value) -> Result<T, ServiceError>,
{
    values
        .into_iter()
        .filter_map(|value| match parse(value) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(error = %e, "Skipping malformed row from backend");
                None
            }
        })
        .collect()
}

pub fn parse_driver(value: Value) -> Result<DriverRecord, ServiceError> {
    parse_row(value)
}

pub fn parse_history(value: Value) -> Result<StatusHistoryRecord, ServiceError> {
    parse_row(value)
}

pub fn parse_note(value: Value) -> Result<NoteRecord, ServiceError> {
    parse_row(value)
}

pub fn driver_to_app(record: DriverRecord) -> Driver {
    Driver {
        id: record.id,
        name: record.nama,
        license_plate: record.plat_nomor,
        user_id: record.user_id,
        phone: record.no_hp,
    }
}

pub fn history_to_app(record: StatusHistoryRecord) -> StatusHistoryEntry {
    StatusHistoryEntry {
        id: record.id,
        shipment_id: record.pengiriman_id,
        previous_status: record.status_lama,
        new_status: record.status_baru,
        notes: record.catatan,
        changed_by: record.changed_by,
        changed_at: record.created_at,
    }
}

pub fn history_to_wire(entry: &NewStatusHistory) -> NewStatusHistoryRecord {
    NewStatusHistoryRecord {
        pengiriman_id: entry.shipment_id,
        status_lama: entry.previous_status,
        status_baru: entry.new_status,
        catatan: entry.notes.clone(),
        changed_by: entry.changed_by.clone(),
        created_at: entry.changed_at,
    }
}

pub fn note_to_app(record: NoteRecord) -> Note {
    Note {
        id: record.id,
        author_name: record.nama_pengirim,
        body: record.pesan,
        image_url: record.gambar_url,
        user_id: record.user_id,
        shipment_id: record.pengiriman_id,
        created_at: record.created_at,
    }
}

pub fn note_to_wire(author_name: &str, user_id: Option<Uuid>, note: &crate::models::NewNote) -> NewNoteRecord {
    NewNoteRecord {
        nama_pengirim: author_name.to_string(),
        pesan: note.body.clone(),
        gambar_url: note.image_url.clone(),
        user_id,
        pengiriman_id: note.shipment_id,
    }
}
