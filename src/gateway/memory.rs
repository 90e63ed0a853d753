use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeKind, ChangeNotification, ChangeSubscription, DriverGateway, LocationSink,
    LocationUpdate, NoteGateway, ShipmentGateway, Table,
};
use crate::dto::{
    DriverEmbed, DriverRecord, LocationAck, NewNoteRecord, NewStatusHistoryRecord, NoteRecord,
    NoteRecordPatch, ShipmentRecord, ShipmentRecordPatch, StatusHistoryRecord,
};
use crate::errors::ServiceError;
use crate::normalize::{self, parse_rows};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    supir: Vec<DriverRecord>,
    #[serde(default)]
    pengiriman: Vec<Value>,
}

#[derive(Debug, Default)]
struct Tables {
    shipments: Vec<ShipmentRecord>,
    history: Vec<StatusHistoryRecord>,
    drivers: Vec<DriverRecord>,
    notes: Vec<NoteRecord>,
}

/// Process-local backend with a broadcast change feed.
///
/// Used for offline/local mode and as the test double for the hosted backend.
/// Rows keep insertion order, like the backend's default ordering.
#[derive(Debug)]
pub struct InMemoryGateway {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<ChangeNotification>,
    offline: AtomicBool,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            feed,
            offline: AtomicBool::new(false),
        }
    }

    /// When offline every call fails as an unreachable backend would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Inserts a driver directly, without emitting a change notification.
    pub fn seed_driver(&self, driver: DriverRecord) {
        self.lock().drivers.push(driver);
    }

    /// Inserts a shipment row directly, without emitting a change notification.
    pub fn seed_shipment(&self, record: ShipmentRecord) {
        self.lock().shipments.push(record);
    }

    /// Loads drivers and shipment rows from a JSON file shaped like
    /// `{"supir": [...], "pengiriman": [...]}`. Invalid shipment rows are
    /// skipped. Returns the number of shipments loaded.
    pub fn load_seed(&self, path: &Path) -> Result<usize, ServiceError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::ConfigError(format!("cannot read seed file {}: {}", path.display(), e))
        })?;
        let seed: SeedFile = serde_json::from_str(&raw)?;
        let shipments = parse_rows(seed.pengiriman, normalize::parse_record);
        let count = shipments.len();

        let mut tables = self.lock();
        tables.drivers.extend(seed.supir);
        tables.shipments.extend(shipments);
        Ok(count)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_online(&self) -> Result<(), ServiceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "backend unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn publish(&self, table: Table, kind: ChangeKind, record_id: Uuid) {
        debug!(%table, %kind, %record_id, "change feed event");
        // Nobody subscribed is not an error.
        let _ = self
            .feed
            .send(ChangeNotification::new(table, kind, Some(record_id)));
    }

    fn embed_driver(tables: &Tables, mut record: ShipmentRecord) -> ShipmentRecord {
        record.supir = record.supir_id.and_then(|driver_id| {
            tables
                .drivers
                .iter()
                .find(|d| d.id == driver_id)
                .map(|d| DriverEmbed {
                    id: d.id,
                    nama: d.nama.clone(),
                    plat_nomor: Some(d.plat_nomor.clone()),
                })
        });
        record
    }
}

#[async_trait]
impl ShipmentGateway for InMemoryGateway {
    async fn list_shipments(&self) -> Result<Vec<ShipmentRecord>, ServiceError> {
        self.ensure_online()?;
        let tables = self.lock();
        Ok(tables
            .shipments
            .iter()
            .cloned()
            .map(|r| Self::embed_driver(&tables, r))
            .collect())
    }

    async fn get_shipment(&self, id: Uuid) -> Result<Option<ShipmentRecord>, ServiceError> {
        self.ensure_online()?;
        let tables = self.lock();
        Ok(tables
            .shipments
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .map(|r| Self::embed_driver(&tables, r)))
    }

    async fn insert_shipment(
        &self,
        patch: &ShipmentRecordPatch,
    ) -> Result<ShipmentRecord, ServiceError> {
        self.ensure_online()?;
        let id = patch.id.unwrap_or_else(Uuid::new_v4);
        let record = {
            let mut tables = self.lock();
            if tables.shipments.iter().any(|r| r.id == id) {
                return Err(ServiceError::RemoteStatus {
                    status: http::StatusCode::CONFLICT,
                    message: format!("duplicate key {}", id),
                });
            }
            let record = patch.clone().into_record(id, Utc::now()).map_err(|column| {
                ServiceError::RemoteStatus {
                    status: http::StatusCode::BAD_REQUEST,
                    message: format!("null value in column \"{}\"", column),
                }
            })?;
            tables.shipments.push(record.clone());
            Self::embed_driver(&tables, record)
        };
        self.publish(Table::Shipments, ChangeKind::Insert, id);
        Ok(record)
    }

    async fn update_shipment(
        &self,
        id: Uuid,
        patch: &ShipmentRecordPatch,
    ) -> Result<ShipmentRecord, ServiceError> {
        self.ensure_online()?;
        let record = {
            let mut tables = self.lock();
            let row = tables
                .shipments
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", id)))?;
            patch.merge_into(row);
            row.updated_at = Some(Utc::now());
            let updated = row.clone();
            Self::embed_driver(&tables, updated)
        };
        self.publish(Table::Shipments, ChangeKind::Update, id);
        Ok(record)
    }

    async fn delete_shipment(&self, id: Uuid) -> Result<(), ServiceError> {
        self.ensure_online()?;
        {
            let mut tables = self.lock();
            let before = tables.shipments.len();
            tables.shipments.retain(|r| r.id != id);
            if tables.shipments.len() == before {
                return Err(ServiceError::NotFound(format!("Shipment {} not found", id)));
            }
        }
        self.publish(Table::Shipments, ChangeKind::Delete, id);
        Ok(())
    }

    async fn append_history(
        &self,
        entry: &NewStatusHistoryRecord,
    ) -> Result<StatusHistoryRecord, ServiceError> {
        self.ensure_online()?;
        let record = StatusHistoryRecord {
            id: Uuid::new_v4(),
            pengiriman_id: entry.pengiriman_id,
            status_lama: entry.status_lama,
            status_baru: entry.status_baru,
            catatan: entry.catatan.clone(),
            changed_by: entry.changed_by.clone(),
            created_at: entry.created_at,
        };
        self.lock().history.push(record.clone());
        self.publish(Table::StatusHistory, ChangeKind::Insert, record.id);
        Ok(record)
    }

    async fn list_history(
        &self,
        shipment_id: Uuid,
    ) -> Result<Vec<StatusHistoryRecord>, ServiceError> {
        self.ensure_online()?;
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|h| h.pengiriman_id == shipment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DriverGateway for InMemoryGateway {
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, ServiceError> {
        self.ensure_online()?;
        Ok(self.lock().drivers.clone())
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<DriverRecord>, ServiceError> {
        self.ensure_online()?;
        Ok(self.lock().drivers.iter().find(|d| d.id == id).cloned())
    }
}

#[async_trait]
impl NoteGateway for InMemoryGateway {
    async fn list_notes(&self, shipment_id: Option<Uuid>) -> Result<Vec<NoteRecord>, ServiceError> {
        self.ensure_online()?;
        Ok(self
            .lock()
            .notes
            .iter()
            .filter(|n| shipment_id.is_none() || n.pengiriman_id == shipment_id)
            .cloned()
            .collect())
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<NoteRecord>, ServiceError> {
        self.ensure_online()?;
        Ok(self.lock().notes.iter().find(|n| n.id == id).cloned())
    }

    async fn insert_note(&self, note: &NewNoteRecord) -> Result<NoteRecord, ServiceError> {
        self.ensure_online()?;
        let record = NoteRecord {
            id: Uuid::new_v4(),
            nama_pengirim: note.nama_pengirim.clone(),
            pesan: note.pesan.clone(),
            gambar_url: note.gambar_url.clone(),
            user_id: note.user_id,
            pengiriman_id: note.pengiriman_id,
            created_at: Utc::now(),
        };
        self.lock().notes.push(record.clone());
        self.publish(Table::Notes, ChangeKind::Insert, record.id);
        Ok(record)
    }

    async fn update_note(&self, id: Uuid, patch: &NoteRecordPatch) -> Result<NoteRecord, ServiceError> {
        self.ensure_online()?;
        let record = {
            let mut tables = self.lock();
            let row = tables
                .notes
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or_else(|| ServiceError::NotFound(format!("Note {} not found", id)))?;
            if let Some(body) = &patch.pesan {
                row.pesan = body.clone();
            }
            if let Some(image) = &patch.gambar_url {
                row.gambar_url = image.clone();
            }
            row.clone()
        };
        self.publish(Table::Notes, ChangeKind::Update, id);
        Ok(record)
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), ServiceError> {
        self.ensure_online()?;
        {
            let mut tables = self.lock();
            let before = tables.notes.len();
            tables.notes.retain(|n| n.id != id);
            if tables.notes.len() == before {
                return Err(ServiceError::NotFound(format!("Note {} not found", id)));
            }
        }
        self.publish(Table::Notes, ChangeKind::Delete, id);
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryGateway {
    async fn subscribe(
        &self,
        table: Table,
        kinds: &[ChangeKind],
    ) -> Result<ChangeSubscription, ServiceError> {
        self.ensure_online()?;
        let mut source = self.feed.subscribe();
        let kinds = kinds.to_vec();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);

        let producer = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(change) => {
                        if change.table != table || !kinds.contains(&change.kind) {
                            continue;
                        }
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events still mean the table changed.
                        warn!(skipped, %table, "change feed lagged");
                        let change = ChangeNotification::new(table, ChangeKind::Update, None);
                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ChangeSubscription::new(rx, producer))
    }
}

#[async_trait]
impl LocationSink for InMemoryGateway {
    async fn update_location(&self, update: &LocationUpdate) -> Result<LocationAck, ServiceError> {
        self.ensure_online()?;
        {
            let mut tables = self.lock();
            let row = tables
                .shipments
                .iter_mut()
                .find(|r| r.id == update.shipment_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Shipment {} not found", update.shipment_id))
                })?;
            row.current_lat = Some(update.lat);
            row.current_lng = Some(update.lng);
            row.updated_at = Some(update.updated_at);
        }
        self.publish(Table::Shipments, ChangeKind::Update, update.shipment_id);
        Ok(LocationAck {
            message: "Location updated".to_string(),
            timestamp: Utc::now(),
        })
    }
}
