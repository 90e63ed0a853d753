//! Live driver location tracking.
//!
//! A tracker asks for location permission, opens a position stream (native
//! API first, browser API as the single fallback) and pushes every fix to
//! the backend's location sink.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{ErrorCategory, ServiceError};
use crate::gateway::{LocationSink, LocationUpdate};
use crate::notifications::Notifier;
use crate::realtime::{ShipmentStore, ShipmentView};

pub mod source;

pub use source::{
    ChannelLocationSource, LocationSource, PermissionProvider, PermissionState, Position,
    PositionStream, StaticPermission,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    RequestingPermission,
    Watching,
}

/// Last failure recorded by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerError {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&ServiceError> for TrackerError {
    fn from(error: &ServiceError) -> Self {
        Self {
            category: error.category(),
            message: error.response_message(),
        }
    }
}

/// Receives human-readable status lines at each tracker transition.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Shared {
    sink: Arc<dyn LocationSink>,
    notifier: Notifier,
    on_status: Option<StatusCallback>,
    state: watch::Sender<TrackerState>,
    last_error: Mutex<Option<TrackerError>>,
}

impl Shared {
    fn report(&self, status: &str) {
        debug!(status, "tracker status");
        if let Some(callback) = &self.on_status {
            callback(status);
        }
    }

    fn set_state(&self, state: TrackerState) {
        self.state.send_replace(state);
    }

    fn record_error(&self, context: &str, error: &ServiceError) {
        match self.last_error.lock() {
            Ok(mut last) => *last = Some(error.into()),
            Err(poisoned) => *poisoned.into_inner() = Some(error.into()),
        }
        self.report(&format!("{}: {}", context, error.response_message()));
        self.notifier.error(context, error);
    }

    fn clear_error(&self) {
        match self.last_error.lock() {
            Ok(mut last) => *last = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

#[derive(Default)]
struct ActiveWatch {
    shipment_id: Option<Uuid>,
    task: Option<JoinHandle<()>>,
}

impl ActiveWatch {
    fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

/// Streams a driver's position for one shipment at a time.
pub struct LocationTracker {
    permissions: Arc<dyn PermissionProvider>,
    store: Option<Arc<ShipmentStore>>,
    native: Option<Arc<dyn LocationSource>>,
    browser: Arc<dyn LocationSource>,
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<ActiveWatch>,
}

impl LocationTracker {
    pub fn new(
        sink: Arc<dyn LocationSink>,
        permissions: Arc<dyn PermissionProvider>,
        native: Option<Arc<dyn LocationSource>>,
        browser: Arc<dyn LocationSource>,
        notifier: Notifier,
    ) -> Self {
        let (state, _) = watch::channel(TrackerState::Idle);
        Self {
            permissions,
            store: None,
            native,
            browser,
            shared: Arc::new(Shared {
                sink,
                notifier,
                on_status: None,
                state,
                last_error: Mutex::new(None),
            }),
            active: tokio::sync::Mutex::new(ActiveWatch::default()),
        }
    }

    /// Installs the status callback. Must be called before tracking starts.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.on_status = Some(callback);
        }
        self
    }

    /// Stops the watch on its own once the tracked shipment is reassigned
    /// to another driver in `store`.
    pub fn with_store(mut self, store: Arc<ShipmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> TrackerState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TrackerState> {
        self.shared.state.subscribe()
    }

    pub fn last_error(&self) -> Option<TrackerError> {
        match self.shared.last_error.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Shipment currently being tracked.
    pub async fn tracking(&self) -> Option<Uuid> {
        let active = self.active.lock().await;
        active.is_running().then_some(active.shipment_id).flatten()
    }

    /// Starts pushing positions for `shipment_id`.
    ///
    /// A no-op when that shipment is already tracked; any other watch is
    /// stopped first.
    #[instrument(skip(self))]
    pub async fn start_tracking(&self, shipment_id: Uuid) -> Result<(), ServiceError> {
        let mut active = self.active.lock().await;
        if active.is_running() {
            if active.shipment_id == Some(shipment_id) {
                debug!("already tracking this shipment");
                return Ok(());
            }
            self.stop_active(&mut active);
        }

        self.shared.clear_error();
        self.shared.set_state(TrackerState::RequestingPermission);
        self.shared.report("Requesting location permission");

        let permission = match self.permissions.request_permission().await {
            Ok(permission) => permission,
            Err(e) => return Err(self.fail_start("Requesting location permission", e)),
        };
        if permission == PermissionState::Denied {
            return Err(self.fail_start("Location tracking", ServiceError::PermissionDenied));
        }

        let (source, positions) = match self.open_stream().await {
            Ok(opened) => opened,
            Err(e) => return Err(self.fail_start("Opening location stream", e)),
        };

        info!(source = %source, "location watch started");
        self.shared.set_state(TrackerState::Watching);
        self.shared.report(&format!("Watching location via {}", source));

        let assignment = self
            .store
            .as_ref()
            .and_then(|store| Assignment::capture(store.clone(), shipment_id));
        let shared = self.shared.clone();
        active.shipment_id = Some(shipment_id);
        active.task = Some(tokio::spawn(watch_positions(
            shared,
            shipment_id,
            positions,
            assignment,
        )));
        Ok(())
    }

    /// Stops the current watch. Stopping while idle does nothing.
    #[instrument(skip(self))]
    pub async fn stop_tracking(&self) {
        let mut active = self.active.lock().await;
        if !active.is_running() {
            debug!("stop requested while idle");
            return;
        }
        self.stop_active(&mut active);
    }

    /// One-off position fix, native first.
    pub async fn get_current_position(&self) -> Result<Position, ServiceError> {
        if let Some(native) = &self.native {
            match native.current_position().await {
                Ok(position) => return Ok(position),
                Err(e) => warn!(source = native.name(), error = %e, "falling back to browser location"),
            }
        }
        self.browser.current_position().await
    }

    fn stop_active(&self, active: &mut ActiveWatch) {
        if let Some(task) = active.task.take() {
            task.abort();
        }
        if let Some(shipment_id) = active.shipment_id.take() {
            info!(%shipment_id, "location watch stopped");
        }
        self.shared.set_state(TrackerState::Idle);
        self.shared.report("Tracking stopped");
    }

    fn fail_start(&self, context: &str, error: ServiceError) -> ServiceError {
        self.shared.set_state(TrackerState::Idle);
        self.shared.record_error(context, &error);
        error
    }

    /// Tries the native source, then the browser source exactly once.
    async fn open_stream(&self) -> Result<(String, PositionStream), ServiceError> {
        if let Some(native) = &self.native {
            match native.watch().await {
                Ok(positions) => return Ok((native.name().to_string(), positions)),
                Err(e) => {
                    warn!(source = native.name(), error = %e, "native location unavailable, falling back");
                }
            }
        }
        let positions = self.browser.watch().await?;
        Ok((self.browser.name().to_string(), positions))
    }
}

impl fmt::Debug for LocationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationTracker")
            .field("state", &self.state())
            .field("has_native", &self.native.is_some())
            .field("browser", &self.browser.name())
            .finish()
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        if let Some(task) = self.active.get_mut().task.take() {
            task.abort();
        }
    }
}

/// Driver a shipment was assigned to when its watch started.
struct Assignment {
    store: Arc<ShipmentStore>,
    view: watch::Receiver<ShipmentView>,
    shipment_id: Uuid,
    driver_id: Option<Uuid>,
}

impl Assignment {
    /// None when the shipment is not cached.
    fn capture(store: Arc<ShipmentStore>, shipment_id: Uuid) -> Option<Self> {
        let view = store.subscribe_view();
        let driver_id = store.get(shipment_id)?.driver_id;
        Some(Self {
            store,
            view,
            shipment_id,
            driver_id,
        })
    }

    /// Resolves once the cached shipment names a different driver.
    async fn reassigned(&mut self) -> Option<Uuid> {
        loop {
            if self.view.changed().await.is_err() {
                return std::future::pending().await;
            }
            if let Some(shipment) = self.store.get(self.shipment_id) {
                if shipment.driver_id != self.driver_id {
                    return shipment.driver_id;
                }
            }
        }
    }
}

/// Pushes each position to the sink without waiting for earlier writes.
async fn watch_positions(
    shared: Arc<Shared>,
    shipment_id: Uuid,
    mut positions: PositionStream,
    mut assignment: Option<Assignment>,
) {
    let mut writes: JoinSet<Result<(), ServiceError>> = JoinSet::new();
    let mut ended = "Location stream ended";

    loop {
        tokio::select! {
            driver_id = async {
                match assignment.as_mut() {
                    Some(assignment) => assignment.reassigned().await,
                    None => std::future::pending().await,
                }
            } => {
                info!(%shipment_id, driver_id = ?driver_id, "shipment reassigned, stopping location watch");
                ended = "Shipment reassigned, tracking stopped";
                break;
            },
            next = positions.next() => match next {
                Some(Ok(position)) => {
                    match position.accuracy_m {
                        Some(accuracy) => shared.report(&format!("Watching location (accuracy {:.0} m)", accuracy)),
                        None => shared.report("Watching location"),
                    }
                    let sink = shared.sink.clone();
                    let update = LocationUpdate {
                        shipment_id,
                        lat: position.lat,
                        lng: position.lng,
                        updated_at: Utc::now(),
                    };
                    writes.spawn(async move { sink.update_location(&update).await.map(|_| ()) });
                }
                Some(Err(e)) => shared.record_error("Location error", &e),
                None => break,
            },
            Some(written) = writes.join_next(), if !writes.is_empty() => match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => shared.record_error("Sending location", &e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(error = %e, "location write task panicked"),
            },
        }
    }

    drop(positions);
    while let Some(written) = writes.join_next().await {
        if let Ok(Err(e)) = written {
            shared.record_error("Sending location", &e);
        }
    }
    shared.set_state(TrackerState::Idle);
    shared.report(ended);
}
