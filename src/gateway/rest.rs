use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeKind, ChangeNotification, ChangeSubscription, DriverGateway, LocationSink,
    LocationUpdate, NoteGateway, ShipmentGateway, Table,
};
use crate::config::AppConfig;
use crate::dto::{
    DriverRecord, LocationAck, NewNoteRecord, NewStatusHistoryRecord, NoteRecord, NoteRecordPatch,
    ShipmentRecord, ShipmentRecordPatch, StatusHistoryRecord, UpdateLocationRequest,
};
use crate::errors::ServiceError;
use crate::normalize::{self, parse_rows};

const SHIPMENT_SELECT: &str = "*,supir(id,nama,plat_nomor)";
const RETURN_REPRESENTATION: &str = "return=representation";

/// Gateway to the hosted backend's REST and function endpoints.
///
/// The backend's websocket feed is not used; [`ChangeFeed`] is served by
/// polling each table and diffing row fingerprints.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
    bearer: String,
    location_function: String,
    poll_interval: Duration,
}

impl RestGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer: access_token.unwrap_or_else(|| api_key.clone()),
            api_key,
            location_function: "update-location".to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.backend_url.clone(),
            config.api_key.clone(),
            config.access_token.clone(),
        )
        .with_location_function(config.location_function.clone())
        .with_poll_interval(config.realtime_poll_interval())
    }

    pub fn with_location_function(mut self, name: impl Into<String>) -> Self {
        self.location_function = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url, name)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::RemoteStatus { status, message });
        }
        Ok(response.json::<T>().await?)
    }

    async fn select(&self, table: Table, query: &[(&str, String)]) -> Result<Vec<Value>, ServiceError> {
        let response = self
            .request(reqwest::Method::GET, self.table_url(table))
            .query(query)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        table: Table,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Vec<Value>, ServiceError> {
        let mut builder = self
            .request(method, self.table_url(table))
            .header("Prefer", RETURN_REPRESENTATION)
            .header(header::CONTENT_TYPE, "application/json")
            .query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Self::read_json(builder.send().await?).await
    }

    fn first_row(rows: Vec<Value>, what: &str, id: Option<Uuid>) -> Result<Value, ServiceError> {
        rows.into_iter().next().ok_or_else(|| match id {
            Some(id) => ServiceError::NotFound(format!("{} {} not found", what, id)),
            None => ServiceError::ExternalServiceError(format!("{} write returned no row", what)),
        })
    }

    /// Row fingerprints keyed by id, used to detect table changes.
    async fn fingerprint(&self, table: Table) -> Result<HashMap<Uuid, u64>, ServiceError> {
        let rows = self.select(table, &[("select", "*".to_string())]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|raw| Uuid::parse_str(raw).ok())?;
                let mut hasher = DefaultHasher::new();
                row.to_string().hash(&mut hasher);
                Some((id, hasher.finish()))
            })
            .collect())
    }
}

/// Changes between two fingerprint snapshots.
pub(crate) fn diff_fingerprints(
    table: Table,
    previous: &HashMap<Uuid, u64>,
    current: &HashMap<Uuid, u64>,
) -> Vec<ChangeNotification> {
    let mut changes = Vec::new();
    for (id, hash) in current {
        match previous.get(id) {
            None => changes.push(ChangeNotification::new(table, ChangeKind::Insert, Some(*id))),
            Some(old) if old != hash => {
                changes.push(ChangeNotification::new(table, ChangeKind::Update, Some(*id)))
            }
            Some(_) => {}
        }
    }
    for id in previous.keys() {
        if !current.contains_key(id) {
            changes.push(ChangeNotification::new(table, ChangeKind::Delete, Some(*id)));
        }
    }
    changes
}

#[async_trait]
impl ShipmentGateway for RestGateway {
    #[instrument(skip(self))]
    async fn list_shipments(&self) -> Result<Vec<ShipmentRecord>, ServiceError> {
        let rows = self
            .select(
                Table::Shipments,
                &[
                    ("select", SHIPMENT_SELECT.to_string()),
                    ("order", "tanggal_kirim.desc".to_string()),
                ],
            )
            .await?;
        Ok(parse_rows(rows, normalize::parse_record))
    }

    #[instrument(skip(self))]
    async fn get_shipment(&self, id: Uuid) -> Result<Option<ShipmentRecord>, ServiceError> {
        let rows = self
            .select(
                Table::Shipments,
                &[
                    ("select", SHIPMENT_SELECT.to_string()),
                    ("id", format!("eq.{}", id)),
                ],
            )
            .await?;
        rows.into_iter().next().map(normalize::parse_record).transpose()
    }

    #[instrument(skip(self, patch))]
    async fn insert_shipment(
        &self,
        patch: &ShipmentRecordPatch,
    ) -> Result<ShipmentRecord, ServiceError> {
        let rows = self
            .write(
                reqwest::Method::POST,
                Table::Shipments,
                &[("select", SHIPMENT_SELECT.to_string())],
                Some(patch),
            )
            .await?;
        normalize::parse_record(Self::first_row(rows, "Shipment", None)?)
    }

    #[instrument(skip(self, patch))]
    async fn update_shipment(
        &self,
        id: Uuid,
        patch: &ShipmentRecordPatch,
    ) -> Result<ShipmentRecord, ServiceError> {
        let rows = self
            .write(
                reqwest::Method::PATCH,
                Table::Shipments,
                &[
                    ("select", SHIPMENT_SELECT.to_string()),
                    ("id", format!("eq.{}", id)),
                ],
                Some(patch),
            )
            .await?;
        normalize::parse_record(Self::first_row(rows, "Shipment", Some(id))?)
    }

    #[instrument(skip(self))]
    async fn delete_shipment(&self, id: Uuid) -> Result<(), ServiceError> {
        let rows = self
            .write::<()>(
                reqwest::Method::DELETE,
                Table::Shipments,
                &[("id", format!("eq.{}", id))],
                None,
            )
            .await?;
        Self::first_row(rows, "Shipment", Some(id)).map(|_| ())
    }

    #[instrument(skip(self, entry))]
    async fn append_history(
        &self,
        entry: &NewStatusHistoryRecord,
    ) -> Result<StatusHistoryRecord, ServiceError> {
        let rows = self
            .write(reqwest::Method::POST, Table::StatusHistory, &[], Some(entry))
            .await?;
        normalize::parse_history(Self::first_row(rows, "History entry", None)?)
    }

    #[instrument(skip(self))]
    async fn list_history(
        &self,
        shipment_id: Uuid,
    ) -> Result<Vec<StatusHistoryRecord>, ServiceError> {
        let rows = self
            .select(
                Table::StatusHistory,
                &[
                    ("pengiriman_id", format!("eq.{}", shipment_id)),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;
        Ok(parse_rows(rows, normalize::parse_history))
    }
}

#[async_trait]
impl DriverGateway for RestGateway {
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>, ServiceError> {
        let rows = self
            .select(Table::Drivers, &[("order", "nama.asc".to_string())])
            .await?;
        Ok(parse_rows(rows, normalize::parse_driver))
    }

    async fn get_driver(&self, id: Uuid) -> Result<Option<DriverRecord>, ServiceError> {
        let rows = self
            .select(Table::Drivers, &[("id", format!("eq.{}", id))])
            .await?;
        rows.into_iter().next().map(normalize::parse_driver).transpose()
    }
}

#[async_trait]
impl NoteGateway for RestGateway {
    async fn list_notes(&self, shipment_id: Option<Uuid>) -> Result<Vec<NoteRecord>, ServiceError> {
        let mut query = vec![("order", "created_at.asc".to_string())];
        if let Some(id) = shipment_id {
            query.push(("pengiriman_id", format!("eq.{}", id)));
        }
        let rows = self.select(Table::Notes, &query).await?;
        Ok(parse_rows(rows, normalize::parse_note))
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<NoteRecord>, ServiceError> {
        let rows = self
            .select(Table::Notes, &[("id", format!("eq.{}", id))])
            .await?;
        rows.into_iter().next().map(normalize::parse_note).transpose()
    }

    async fn insert_note(&self, note: &NewNoteRecord) -> Result<NoteRecord, ServiceError> {
        let rows = self
            .write(reqwest::Method::POST, Table::Notes, &[], Some(note))
            .await?;
        normalize::parse_note(Self::first_row(rows, "Note", None)?)
    }

    async fn update_note(&self, id: Uuid, patch: &NoteRecordPatch) -> Result<NoteRecord, ServiceError> {
        let rows = self
            .write(
                reqwest::Method::PATCH,
                Table::Notes,
                &[("id", format!("eq.{}", id))],
                Some(patch),
            )
            .await?;
        normalize::parse_note(Self::first_row(rows, "Note", Some(id))?)
    }

    async fn delete_note(&self, id: Uuid) -> Result<(), ServiceError> {
        let rows = self
            .write::<()>(
                reqwest::Method::DELETE,
                Table::Notes,
                &[("id", format!("eq.{}", id))],
                None,
            )
            .await?;
        Self::first_row(rows, "Note", Some(id)).map(|_| ())
    }
}

#[async_trait]
impl ChangeFeed for RestGateway {
    async fn subscribe(
        &self,
        table: Table,
        kinds: &[ChangeKind],
    ) -> Result<ChangeSubscription, ServiceError> {
        // Fail fast if the table is unreachable; this also seeds the baseline.
        let baseline = self.fingerprint(table).await?;
        let kinds = kinds.to_vec();
        let gateway = self.clone();
        let (tx, rx) = mpsc::channel(64);

        let producer = tokio::spawn(async move {
            let mut previous = baseline;
            let mut ticker = tokio::time::interval(gateway.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let current = match gateway.fingerprint(table).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(error = %e, %table, "change poll failed");
                        continue;
                    }
                };
                for change in diff_fingerprints(table, &previous, &current) {
                    if !kinds.contains(&change.kind) {
                        continue;
                    }
                    debug!(%table, kind = %change.kind, "change detected");
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
                previous = current;
            }
        });

        Ok(ChangeSubscription::new(rx, producer))
    }
}

#[async_trait]
impl LocationSink for RestGateway {
    #[instrument(skip(self), fields(shipment_id = %update.shipment_id))]
    async fn update_location(&self, update: &LocationUpdate) -> Result<LocationAck, ServiceError> {
        let body = UpdateLocationRequest {
            shipment_id: update.shipment_id,
            lat: update.lat,
            lng: update.lng,
        };
        let response = self
            .request(
                reqwest::Method::POST,
                self.function_url(&self.location_function),
            )
            .json(&body)
            .send()
            .await?;
        Self::read_json(response).await
    }
}
