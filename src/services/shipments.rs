use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Action, Actor};
use crate::dto::LocationAck;
use crate::errors::ServiceError;
use crate::gateway::{DriverGateway, LocationSink, LocationUpdate, ShipmentGateway};
use crate::models::{
    NewStatusHistory, Shipment, ShipmentPatch, ShipmentStatus, StatusChange, StatusHistoryEntry,
};
use crate::normalize::{history_to_app, history_to_wire, to_app, to_wire};
use crate::notifications::Notifier;
use crate::realtime::ShipmentStore;

/// Input for creating a shipment.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateShipmentInput {
    #[validate(length(min = 1, max = 64, message = "Delivery note number is required"))]
    pub delivery_note_number: String,

    #[validate(length(min = 1, max = 200, message = "Company is required"))]
    pub company: String,

    #[validate(length(min = 1, max = 500, message = "Destination is required"))]
    pub destination: String,

    pub driver_id: Option<Uuid>,

    #[validate(range(min = 0, max = 1_000_000, message = "Quantity must not be negative"))]
    pub quantity: i64,

    pub ship_date: NaiveDate,

    #[validate(url(message = "Tracking URL must be a valid URL"))]
    pub tracking_url: Option<String>,
}

/// Shipment mutations.
///
/// Every operation authorizes and validates before any remote call, writes
/// through the gateway, then updates the local store. Remote failures are
/// published on the notifier and leave the store untouched.
#[derive(Clone)]
pub struct ShipmentService {
    gateway: Arc<dyn ShipmentGateway>,
    drivers: Arc<dyn DriverGateway>,
    locations: Arc<dyn LocationSink>,
    store: Arc<ShipmentStore>,
    notifier: Notifier,
}

impl ShipmentService {
    pub fn new(
        gateway: Arc<dyn ShipmentGateway>,
        drivers: Arc<dyn DriverGateway>,
        locations: Arc<dyn LocationSink>,
        store: Arc<ShipmentStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            gateway,
            drivers,
            locations,
            store,
            notifier,
        }
    }

    fn notified(&self, context: &str, error: ServiceError) -> ServiceError {
        self.notifier.error(context, &error);
        error
    }

    /// Cached shipment, or the backend's copy when it is not cached yet.
    async fn current(&self, id: Uuid) -> Result<Shipment, ServiceError> {
        if let Some(shipment) = self.store.get(id) {
            return Ok(shipment);
        }
        self.gateway
            .get_shipment(id)
            .await
            .map_err(|e| self.notified("Loading shipment", e))?
            .map(to_app)
            .ok_or_else(|| ServiceError::NotFound(format!("Shipment {} not found", id)))
    }

    async fn ensure_driver(&self, driver_id: Uuid) -> Result<(), ServiceError> {
        let driver = self
            .drivers
            .get_driver(driver_id)
            .await
            .map_err(|e| self.notified("Checking driver", e))?;
        match driver {
            Some(_) => Ok(()),
            None => Err(ServiceError::InvalidInput(format!(
                "Driver {} does not exist",
                driver_id
            ))),
        }
    }

    async fn write_patch(
        &self,
        context: &str,
        id: Uuid,
        patch: ShipmentPatch,
    ) -> Result<Shipment, ServiceError> {
        let record = self
            .gateway
            .update_shipment(id, &to_wire(&patch))
            .await
            .map_err(|e| self.notified(context, e))?;
        let shipment = to_app(record);
        self.store.upsert(shipment.clone());
        Ok(shipment)
    }

    /// Reloads the full collection into the store.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, ServiceError> {
        let ticket = self.store.begin_fetch();
        let records = self
            .gateway
            .list_shipments()
            .await
            .map_err(|e| self.notified("Loading shipments", e))?;
        let shipments: Vec<Shipment> = records.into_iter().map(to_app).collect();
        let count = shipments.len();
        if !self.store.complete_fetch(ticket, shipments) {
            warn!("refresh superseded by a newer fetch");
        }
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Shipment, ServiceError> {
        self.current(id).await
    }

    /// Creates a pending shipment and records its first history entry.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn create(
        &self,
        actor: &Actor,
        input: CreateShipmentInput,
    ) -> Result<Shipment, ServiceError> {
        actor.authorize(Action::CreateShipment, None)?;
        input.validate()?;
        let quantity = u32::try_from(input.quantity)
            .map_err(|_| ServiceError::InvalidInput("Quantity must not be negative".to_string()))?;
        if let Some(driver_id) = input.driver_id {
            self.ensure_driver(driver_id).await?;
        }

        let patch = ShipmentPatch {
            delivery_note_number: Some(input.delivery_note_number.trim().to_string()),
            company: Some(input.company.trim().to_string()),
            destination: Some(input.destination.trim().to_string()),
            driver_id: Some(input.driver_id),
            quantity: Some(quantity),
            ship_date: Some(input.ship_date),
            arrival_date: Some(None),
            arrival_time: Some(None),
            status: Some(ShipmentStatus::Pending),
            issue: Some(None),
            tracking_url: Some(input.tracking_url.filter(|url| !url.trim().is_empty())),
            updated_by: Some(Some(actor.display_name.clone())),
            ..Default::default()
        };

        let record = self
            .gateway
            .insert_shipment(&to_wire(&patch))
            .await
            .map_err(|e| self.notified("Creating shipment", e))?;
        let shipment = to_app(record);

        self.record_history(actor, &shipment, None, Some("Shipment created".to_string()))
            .await;
        self.store.upsert(shipment.clone());
        info!(shipment_id = %shipment.id, "shipment created");
        self.notifier
            .success(format!("Shipment {} created", shipment.delivery_note_number));
        Ok(shipment)
    }

    /// Moves a shipment to a new status and appends a history entry.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        id: Uuid,
        change: StatusChange,
        notes: Option<String>,
    ) -> Result<Shipment, ServiceError> {
        let current = self.current(id).await?;
        actor.authorize(Action::UpdateStatus, Some(&current))?;

        let mut next = current.clone();
        let previous = next.apply_status(&change)?;
        next.check_invariants()?;

        let mut patch = ShipmentPatch::status_fields(&next);
        patch.updated_by = Some(Some(actor.display_name.clone()));
        let updated = self.write_patch("Updating status", id, patch).await?;

        let notes = notes.filter(|n| !n.trim().is_empty());
        self.record_history(actor, &updated, Some(previous), notes).await;
        info!(from = %previous, to = %updated.status, "shipment status updated");
        self.notifier.success(format!(
            "Shipment {} marked {}",
            updated.delivery_note_number,
            updated.status.label()
        ));
        Ok(updated)
    }

    /// History writes are best effort; a failure is surfaced but does not
    /// undo the status change.
    async fn record_history(
        &self,
        actor: &Actor,
        shipment: &Shipment,
        previous: Option<ShipmentStatus>,
        notes: Option<String>,
    ) {
        let entry = NewStatusHistory {
            shipment_id: shipment.id,
            previous_status: previous,
            new_status: shipment.status,
            notes,
            changed_by: Some(actor.display_name.clone()),
            changed_at: Utc::now(),
        };
        if let Err(e) = self.gateway.append_history(&history_to_wire(&entry)).await {
            self.notifier.error("Recording status history", &e);
        }
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn reassign_driver(
        &self,
        actor: &Actor,
        id: Uuid,
        driver_id: Option<Uuid>,
    ) -> Result<Shipment, ServiceError> {
        let current = self.current(id).await?;
        actor.authorize(Action::ReassignDriver, Some(&current))?;
        if let Some(driver_id) = driver_id {
            self.ensure_driver(driver_id).await?;
        }

        let patch = ShipmentPatch {
            driver_id: Some(driver_id),
            updated_by: Some(Some(actor.display_name.clone())),
            ..Default::default()
        };
        self.write_patch("Reassigning driver", id, patch).await
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn edit_quantity(
        &self,
        actor: &Actor,
        id: Uuid,
        quantity: i64,
    ) -> Result<Shipment, ServiceError> {
        let current = self.current(id).await?;
        actor.authorize(Action::EditQuantity, Some(&current))?;
        let quantity = u32::try_from(quantity).map_err(|_| {
            ServiceError::InvalidInput(format!("Quantity {} is out of range", quantity))
        })?;

        let patch = ShipmentPatch {
            quantity: Some(quantity),
            updated_by: Some(Some(actor.display_name.clone())),
            ..Default::default()
        };
        self.write_patch("Editing quantity", id, patch).await
    }

    /// Sets or clears the tracking URL override.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn edit_tracking_url(
        &self,
        actor: &Actor,
        id: Uuid,
        url: Option<String>,
    ) -> Result<Shipment, ServiceError> {
        let current = self.current(id).await?;
        actor.authorize(Action::EditTrackingUrl, Some(&current))?;

        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if let Some(url) = &url {
            if !validator::validate_url(url.as_str()) {
                return Err(ServiceError::InvalidInput(format!(
                    "'{}' is not a valid URL",
                    url
                )));
            }
        }

        let patch = ShipmentPatch {
            tracking_url: Some(url),
            updated_by: Some(Some(actor.display_name.clone())),
            ..Default::default()
        };
        self.write_patch("Editing tracking URL", id, patch).await
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), ServiceError> {
        let current = self.current(id).await?;
        actor.authorize(Action::DeleteShipment, Some(&current))?;
        self.gateway
            .delete_shipment(id)
            .await
            .map_err(|e| self.notified("Deleting shipment", e))?;
        self.store.remove(id);
        self.notifier
            .success(format!("Shipment {} deleted", current.delivery_note_number));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn history(&self, id: Uuid) -> Result<Vec<StatusHistoryEntry>, ServiceError> {
        let records = self
            .gateway
            .list_history(id)
            .await
            .map_err(|e| self.notified("Loading status history", e))?;
        Ok(records.into_iter().map(history_to_app).collect())
    }

    /// Sends one position for a shipment to the location function.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn push_location(
        &self,
        actor: &Actor,
        id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<LocationAck, ServiceError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(ServiceError::InvalidInput(format!(
                "Coordinates ({}, {}) are out of range",
                lat, lng
            )));
        }
        let current = self.current(id).await?;
        actor.authorize(Action::PushLocation, Some(&current))?;

        let update = LocationUpdate {
            shipment_id: id,
            lat,
            lng,
            updated_at: Utc::now(),
        };
        let ack = self
            .locations
            .update_location(&update)
            .await
            .map_err(|e| self.notified("Sending location", e))?;

        let mut moved = current;
        moved.current_lat = Some(lat);
        moved.current_lng = Some(lng);
        self.store.upsert(moved);
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use assert_matches::assert_matches;

    fn service() -> (ShipmentService, Arc<InMemoryGateway>, Arc<ShipmentStore>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let store = Arc::new(ShipmentStore::new());
        let service = ShipmentService::new(
            gateway.clone(),
            gateway.clone(),
            gateway.clone(),
            store.clone(),
            Notifier::default(),
        );
        (service, gateway, store)
    }

    fn input() -> CreateShipmentInput {
        CreateShipmentInput {
            delivery_note_number: "SJ-100".to_string(),
            company: "PT Maju Jaya".to_string(),
            destination: "Surabaya".to_string(),
            driver_id: None,
            quantity: 12,
            ship_date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
            tracking_url: None,
        }
    }

    #[tokio::test]
    async fn create_starts_pending_with_history() {
        let (service, _, store) = service();
        let admin = Actor::admin("Ops");

        let created = service.create(&admin, input()).await.expect("created");
        assert_eq!(created.status, ShipmentStatus::Pending);
        assert_eq!(store.snapshot().len(), 1);

        let history = service.history(created.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_status, None);
        assert_eq!(history[0].new_status, ShipmentStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_negative_quantity_before_remote_call() {
        let (service, gateway, _) = service();
        gateway.set_offline(true);
        let mut bad = input();
        bad.quantity = -1;
        assert_matches!(
            service.create(&Actor::admin("Ops"), bad).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn edit_tracking_url_validates_and_clears() {
        let (service, _, _) = service();
        let admin = Actor::admin("Ops");
        let created = service.create(&admin, input()).await.expect("created");

        assert_matches!(
            service
                .edit_tracking_url(&admin, created.id, Some("not a url".into()))
                .await,
            Err(ServiceError::InvalidInput(_))
        );
        let set = service
            .edit_tracking_url(&admin, created.id, Some("https://carrier.example/x".into()))
            .await
            .expect("set");
        assert_eq!(set.tracking_url.as_deref(), Some("https://carrier.example/x"));
        let cleared = service
            .edit_tracking_url(&admin, created.id, Some("  ".into()))
            .await
            .expect("cleared");
        assert_eq!(cleared.tracking_url, None);
    }

    #[tokio::test]
    async fn delete_removes_from_store() {
        let (service, _, store) = service();
        let admin = Actor::admin("Ops");
        let created = service.create(&admin, input()).await.expect("created");
        service.delete(&admin, created.id).await.expect("deleted");
        assert!(store.get(created.id).is_none());
        assert_matches!(
            service.get(created.id).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn push_location_rejects_out_of_range_coordinates() {
        let (service, _, _) = service();
        let admin = Actor::admin("Ops");
        let created = service.create(&admin, input()).await.expect("created");
        assert_matches!(
            service.push_location(&admin, created.id, 91.0, 0.0).await,
            Err(ServiceError::InvalidInput(_))
        );
        service
            .push_location(&admin, created.id, -6.2, 106.8)
            .await
            .expect("pushed");
        let moved = service.get(created.id).await.expect("shipment");
        assert!(moved.has_position());
    }
}
