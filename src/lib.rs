//! Logitrack client core
//!
//! Shipment tracking against a hosted backend: a locally cached shipment
//! collection kept in sync with the backend's change feed, multi-criteria
//! filtering, live driver location tracking, and the shipment, forum and
//! reporting operations built on top of them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod dto;
pub mod errors;
pub mod filter;
pub mod gateway;
pub mod models;
pub mod normalize;
pub mod notifications;
pub mod realtime;
pub mod services;
pub mod tracker;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::gateway::{
    ChangeFeed, DriverGateway, Gateway, InMemoryGateway, LocationSink, NoteGateway, RestGateway,
    ShipmentGateway,
};
use crate::notifications::Notifier;
use crate::realtime::{Reconciler, ShipmentStore};
use crate::services::{DriverService, NoteService, ReportService, ShipmentService};
use crate::tracker::{LocationSource, LocationTracker, PermissionProvider};

/// Composition root: every long-lived component, explicitly constructed.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ShipmentStore>,
    pub notifier: Notifier,
    pub shipments: ShipmentService,
    pub drivers: DriverService,
    pub notes: NoteService,
    pub reports: ReportService,
    pub reconciler: Reconciler,
    location_sink: Arc<dyn LocationSink>,
}

impl AppState {
    /// Wires every service against one gateway.
    pub fn new<G: Gateway + 'static>(config: AppConfig, gateway: Arc<G>) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        let store = Arc::new(ShipmentStore::new());

        let shipment_gateway: Arc<dyn ShipmentGateway> = gateway.clone();
        let driver_gateway: Arc<dyn DriverGateway> = gateway.clone();
        let note_gateway: Arc<dyn NoteGateway> = gateway.clone();
        let feed: Arc<dyn ChangeFeed> = gateway.clone();
        let location_sink: Arc<dyn LocationSink> = gateway;

        let shipments = ShipmentService::new(
            shipment_gateway.clone(),
            driver_gateway.clone(),
            location_sink.clone(),
            store.clone(),
            notifier.clone(),
        );
        let reconciler = Reconciler::new(
            shipment_gateway.clone(),
            feed,
            store.clone(),
            notifier.clone(),
        )
        .with_coalesce_window(config.realtime_coalesce_window());

        Self {
            drivers: DriverService::new(driver_gateway, notifier.clone()),
            notes: NoteService::new(note_gateway, shipment_gateway, notifier.clone()),
            reports: ReportService::new(store.clone()),
            shipments,
            reconciler,
            store,
            notifier,
            location_sink,
            config,
        }
    }

    /// Builds the gateway selected by `gateway_mode` and wires the state.
    pub fn from_config(config: AppConfig) -> Result<Self, ServiceError> {
        if config.uses_rest_gateway() {
            info!(backend = %config.backend_url, "using REST gateway");
            let gateway = Arc::new(RestGateway::from_config(&config));
            return Ok(Self::new(config, gateway));
        }

        let gateway = Arc::new(InMemoryGateway::new());
        if let Some(path) = &config.seed_path {
            let loaded = gateway.load_seed(Path::new(path))?;
            info!(path = %path, loaded, "seeded in-memory gateway");
        }
        info!("using in-memory gateway");
        Ok(Self::new(config, gateway))
    }

    /// A location tracker that writes through this state's gateway and stops
    /// when the tracked shipment is reassigned.
    pub fn location_tracker(
        &self,
        permissions: Arc<dyn PermissionProvider>,
        native: Option<Arc<dyn LocationSource>>,
        browser: Arc<dyn LocationSource>,
    ) -> LocationTracker {
        LocationTracker::new(
            self.location_sink.clone(),
            permissions,
            native,
            browser,
            self.notifier.clone(),
        )
        .with_store(self.store.clone())
    }
}
