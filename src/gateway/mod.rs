//! Boundary to the hosted backend.
//!
//! The backend is split into narrow traits so each consumer depends only on
//! what it calls; [`Gateway`] bundles them for the composition root.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::dto::{
    DriverRecord, LocationAck, NewNoteRecord, NewStatusHistoryRecord, NoteRecord, NoteRecordPatch,
    ShipmentRecord, ShipmentRecordPatch, StatusHistoryRecord,
};
use crate::errors::ServiceError;

pub mod memory;
pub mod rest;

pub use memory::InMemoryGateway;
pub use rest::RestGateway;

/// Backend tables that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize)]
pub enum Table {
    #[strum(serialize = "pengiriman")]
    Shipments,
    #[strum(serialize = "status_history")]
    StatusHistory,
    #[strum(serialize = "supir")]
    Drivers,
    #[strum(serialize = "diskusi")]
    Notes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];
}

/// Push message indicating a row was inserted, updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: Table,
    pub kind: ChangeKind,
    pub record_id: Option<Uuid>,
    pub received_at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(table: Table, kind: ChangeKind, record_id: Option<Uuid>) -> Self {
        Self {
            table,
            kind,
            record_id,
            received_at: Utc::now(),
        }
    }
}

/// An open change-feed channel.
///
/// Dropping or closing the subscription stops the producing task; no
/// notification is delivered afterwards.
pub struct ChangeSubscription {
    receiver: mpsc::Receiver<ChangeNotification>,
    producer: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    pub fn new(receiver: mpsc::Receiver<ChangeNotification>, producer: JoinHandle<()>) -> Self {
        Self {
            receiver,
            producer: Some(producer),
        }
    }

    /// Subscription fed directly by a sender the caller owns.
    pub fn from_receiver(receiver: mpsc::Receiver<ChangeNotification>) -> Self {
        Self {
            receiver,
            producer: None,
        }
    }

    /// Waits for the next notification; `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.receiver.recv().await
    }

    /// Returns a notification that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeNotification> {
        self.receiver.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.receiver.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("has_producer", &self.producer.is_some())
            .finish()
    }
}

/// A single coordinate write for a tracked shipment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub shipment_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ShipmentGateway: Send + Sync {
    async fn list_shipments(&self) -> Result<Vec<ShipmentRecord>, ServiceError>;
    async fn get_shipment(&self, id: Uuid) -> Result<Option<ShipmentRecord>, ServiceError>;
    async fn insert_shipment(&self, patch: &ShipmentRecordPatch) -> Result<ShipmentRecord, ServiceError>;
    async fn update_shipment(
        &self,
        id: Uuid,
        patch: &ShipmentRecordPatch,
    ) -> Result<ShipmentRecord, ServiceError>;
    async fn delete_shipment(&self, id: Uuid) -> Result<(), ServiceError>;
    async fn append_history(
        &self,
        entry: &NewStatusHistoryRecord,
    ) -> Result<StatusHistoryRecord, ServiceError>;
    async fn list_history(&self, shipment_id: Uuid) -> Result<Vec<StatusHistoryRecord>, ServiceError>;
}

#[async_trait]
pub trait DriverGateway: Send + Sync {
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, ServiceError>;
    async fn get_driver(&self, id: Uuid) -> Result<Option<DriverRecord>, ServiceError>;
}

#[async_trait]
pub trait NoteGateway: Send + Sync {
    /// Lists messages, optionally restricted to one shipment's thread.
    async fn list_notes(&self, shipment_id: Option<Uuid>) -> Result<Vec<NoteRecord>, ServiceError>;
    async fn get_note(&self, id: Uuid) -> Result<Option<NoteRecord>, ServiceError>;
    async fn insert_note(&self, note: &NewNoteRecord) -> Result<NoteRecord, ServiceError>;
    async fn update_note(&self, id: Uuid, patch: &NoteRecordPatch) -> Result<NoteRecord, ServiceError>;
    async fn delete_note(&self, id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        table: Table,
        kinds: &[ChangeKind],
    ) -> Result<ChangeSubscription, ServiceError>;
}

/// Destination for live driver positions (the `update-location` function).
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn update_location(&self, update: &LocationUpdate) -> Result<LocationAck, ServiceError>;
}

/// Everything the application needs from the backend.
pub trait Gateway: ShipmentGateway + DriverGateway + NoteGateway + ChangeFeed + LocationSink {}

impl<T> Gateway for T where T: ShipmentGateway + DriverGateway + NoteGateway + ChangeFeed + LocationSink {}
