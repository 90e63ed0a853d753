use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use logitrack::auth::Actor;
use logitrack::config::AppConfig;
use logitrack::dto::{DriverRecord, LocationAck};
use logitrack::errors::{ErrorCategory, ServiceError};
use logitrack::gateway::{InMemoryGateway, LocationSink, LocationUpdate, ShipmentGateway};
use logitrack::notifications::Notifier;
use logitrack::services::CreateShipmentInput;
use logitrack::tracker::{
    ChannelLocationSource, LocationSource, LocationTracker, PermissionState, Position,
    PositionStream, StaticPermission, TrackerState,
};
use logitrack::AppState;

/// Sink that records every write and can be switched to failing.
#[derive(Default)]
struct RecordingSink {
    writes: Mutex<Vec<LocationUpdate>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn writes(&self) -> Vec<LocationUpdate> {
        self.writes.lock().expect("writes").clone()
    }
}

#[async_trait]
impl LocationSink for RecordingSink {
    async fn update_location(&self, update: &LocationUpdate) -> Result<LocationAck, ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("function timed out".to_string()));
        }
        self.writes.lock().expect("writes").push(*update);
        Ok(LocationAck {
            message: "Location updated".to_string(),
            timestamp: Utc::now(),
        })
    }
}

/// Source that replays a fixed track and then ends.
struct ReplaySource(Vec<Position>);

#[async_trait]
impl LocationSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn watch(&self) -> Result<PositionStream, ServiceError> {
        Ok(stream::iter(self.0.clone().into_iter().map(Ok)).boxed())
    }

    async fn current_position(&self) -> Result<Position, ServiceError> {
        self.0
            .first()
            .copied()
            .ok_or_else(|| ServiceError::LocationUnavailable("empty track".to_string()))
    }
}

struct Harness {
    tracker: LocationTracker,
    sink: Arc<RecordingSink>,
    native: Arc<ChannelLocationSource>,
    browser: Arc<ChannelLocationSource>,
    statuses: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(permission: PermissionState, native: ChannelLocationSource) -> Self {
        Self::with_sources(permission, native, ChannelLocationSource::new("browser"))
    }

    fn with_sources(
        permission: PermissionState,
        native: ChannelLocationSource,
        browser: ChannelLocationSource,
    ) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let native = Arc::new(native);
        let browser = Arc::new(browser);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let recorded = statuses.clone();

        let tracker = LocationTracker::new(
            sink.clone(),
            Arc::new(StaticPermission(permission)),
            Some(native.clone() as Arc<dyn LocationSource>),
            browser.clone(),
            Notifier::default(),
        )
        .with_status_callback(Arc::new(move |status: &str| {
            recorded.lock().expect("statuses").push(status.to_string());
        }));

        Self {
            tracker,
            sink,
            native,
            browser,
            statuses,
        }
    }

    fn statuses(&self) -> Vec<String> {
        self.statuses.lock().expect("statuses").clone()
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_no_shipment(tracker: &LocationTracker) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tracker.tracking().await.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for the watch to finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn stop_while_idle_is_a_no_op() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));

    h.tracker.stop_tracking().await;

    assert_eq!(h.tracker.state(), TrackerState::Idle);
    assert!(h.statuses().is_empty());
    assert!(h.tracker.last_error().is_none());
}

#[tokio::test]
async fn prefers_native_source() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    let shipment = Uuid::new_v4();

    h.tracker.start_tracking(shipment).await.expect("start");

    assert_eq!(h.tracker.state(), TrackerState::Watching);
    assert_eq!(h.native.watcher_count(), 1);
    assert_eq!(h.browser.watcher_count(), 0);
    assert!(h.statuses().contains(&"Watching location via native".to_string()));
}

#[tokio::test]
async fn falls_back_to_browser_when_native_is_unavailable() {
    let h = Harness::new(
        PermissionState::Granted,
        ChannelLocationSource::unavailable("native"),
    );
    let shipment = Uuid::new_v4();

    h.tracker.start_tracking(shipment).await.expect("start");
    assert_eq!(h.browser.watcher_count(), 1);
    assert!(h.statuses().contains(&"Watching location via browser".to_string()));

    h.browser.push(Position::new(-6.2, 106.8).with_accuracy(12.0));
    wait_until("write", || h.sink.writes().len() == 1).await;

    let write = h.sink.writes()[0];
    assert_eq!(write.shipment_id, shipment);
    assert_eq!((write.lat, write.lng), (-6.2, 106.8));
    assert!(h
        .statuses()
        .contains(&"Watching location (accuracy 12 m)".to_string()));
}

#[tokio::test]
async fn denied_permission_leaves_tracker_idle_with_error() {
    let h = Harness::new(PermissionState::Denied, ChannelLocationSource::new("native"));

    let result = h.tracker.start_tracking(Uuid::new_v4()).await;

    assert_matches!(result, Err(ServiceError::PermissionDenied));
    assert_eq!(h.tracker.state(), TrackerState::Idle);
    let error = h.tracker.last_error().expect("error recorded");
    assert_eq!(error.category, ErrorCategory::PermissionDenied);
    assert_eq!(h.native.watcher_count(), 0);
    assert_eq!(h.browser.watcher_count(), 0);
    assert!(h.tracker.tracking().await.is_none());
}

#[tokio::test]
async fn restarting_the_same_shipment_keeps_one_watch() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    let shipment = Uuid::new_v4();

    h.tracker.start_tracking(shipment).await.expect("start");
    h.tracker.start_tracking(shipment).await.expect("restart");

    assert_eq!(h.native.watcher_count(), 1);
    assert_eq!(h.tracker.tracking().await, Some(shipment));
    let requests = h
        .statuses()
        .iter()
        .filter(|s| s.as_str() == "Requesting location permission")
        .count();
    assert_eq!(requests, 1);
}

#[tokio::test]
async fn switching_shipment_stops_previous_watch() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    h.tracker.start_tracking(first).await.expect("first");
    h.tracker.start_tracking(second).await.expect("second");

    wait_until("old watch dropped", || h.native.watcher_count() == 1).await;
    assert_eq!(h.tracker.tracking().await, Some(second));
    assert!(h.statuses().contains(&"Tracking stopped".to_string()));

    h.native.push(Position::new(1.0, 2.0));
    wait_until("write", || h.sink.writes().len() == 1).await;
    assert_eq!(h.sink.writes()[0].shipment_id, second);
}

#[tokio::test]
async fn every_position_is_written_exactly_once() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    h.tracker.start_tracking(Uuid::new_v4()).await.expect("start");

    for i in 0..3 {
        h.native.push(Position::new(i as f64, i as f64));
    }
    wait_until("three writes", || h.sink.writes().len() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut lats: Vec<f64> = h.sink.writes().iter().map(|w| w.lat).collect();
    lats.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(lats, vec![0.0, 1.0, 2.0]);
}

#[tokio::test]
async fn write_failures_are_reported_and_tracking_continues() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    h.tracker.start_tracking(Uuid::new_v4()).await.expect("start");
    h.sink.failing.store(true, Ordering::SeqCst);

    h.native.push(Position::new(1.0, 1.0));
    wait_until("failure reported", || h.tracker.last_error().is_some()).await;

    assert!(h
        .statuses()
        .iter()
        .any(|s| s.starts_with("Sending location:")));
    assert_eq!(h.tracker.state(), TrackerState::Watching);

    h.sink.failing.store(false, Ordering::SeqCst);
    h.native.push(Position::new(2.0, 2.0));
    wait_until("later write", || h.sink.writes().len() == 1).await;
}

#[tokio::test]
async fn stop_tracking_returns_to_idle() {
    let h = Harness::new(PermissionState::Granted, ChannelLocationSource::new("native"));
    h.tracker.start_tracking(Uuid::new_v4()).await.expect("start");

    h.tracker.stop_tracking().await;

    assert_eq!(h.tracker.state(), TrackerState::Idle);
    assert!(h.tracker.tracking().await.is_none());
    wait_until("watch dropped", || h.native.watcher_count() == 0).await;
}

#[tokio::test]
async fn current_position_falls_back_to_browser() {
    let h = Harness::new(
        PermissionState::Granted,
        ChannelLocationSource::unavailable("native"),
    );
    h.browser.push(Position::new(-7.25, 112.75));

    let position = h.tracker.get_current_position().await.expect("position");
    assert_eq!((position.lat, position.lng), (-7.25, 112.75));
}

#[tokio::test]
async fn no_location_source_leaves_tracker_idle_with_one_error() {
    let h = Harness::with_sources(
        PermissionState::Granted,
        ChannelLocationSource::unavailable("native"),
        ChannelLocationSource::unavailable("browser"),
    );

    let result = h.tracker.start_tracking(Uuid::new_v4()).await;

    assert_matches!(result, Err(ServiceError::LocationUnavailable(_)));
    assert_eq!(h.tracker.state(), TrackerState::Idle);
    let error = h.tracker.last_error().expect("error recorded");
    assert_eq!(error.category, ErrorCategory::PermissionDenied);
    assert_eq!(
        h.statuses()
            .iter()
            .filter(|s| s.starts_with("Opening location stream"))
            .count(),
        1
    );
    assert_eq!(h.native.watcher_count(), 0);
    assert_eq!(h.browser.watcher_count(), 0);
    assert!(h.tracker.tracking().await.is_none());
}

#[tokio::test]
async fn stopping_after_the_stream_ended_reports_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let statuses = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorded = statuses.clone();
    let tracker = LocationTracker::new(
        sink.clone(),
        Arc::new(StaticPermission(PermissionState::Granted)),
        None,
        Arc::new(ReplaySource(vec![Position::new(1.0, 1.0), Position::new(2.0, 2.0)])),
        Notifier::default(),
    )
    .with_status_callback(Arc::new(move |status: &str| {
        recorded.lock().expect("statuses").push(status.to_string());
    }));

    tracker.start_tracking(Uuid::new_v4()).await.expect("start");
    wait_until("stream end", || {
        statuses
            .lock()
            .expect("statuses")
            .contains(&"Location stream ended".to_string())
    })
    .await;
    wait_for_no_shipment(&tracker).await;
    assert_eq!(sink.writes().len(), 2);
    assert_eq!(tracker.state(), TrackerState::Idle);

    tracker.stop_tracking().await;

    let statuses = statuses.lock().expect("statuses").clone();
    assert!(!statuses.contains(&"Tracking stopped".to_string()));
}

#[tokio::test]
async fn reassigning_the_tracked_shipment_stops_tracking() {
    let gateway = Arc::new(InMemoryGateway::new());
    let driver = |nama: &str, plat: &str| DriverRecord {
        id: Uuid::new_v4(),
        nama: nama.to_string(),
        plat_nomor: plat.to_string(),
        user_id: None,
        no_hp: None,
    };
    let first = driver("Budi", "B 1234 XY");
    let second = driver("Andi", "H 77 AB");
    gateway.seed_driver(first.clone());
    gateway.seed_driver(second.clone());
    let state = AppState::new(AppConfig::in_memory(), gateway.clone());
    let admin = Actor::admin("Admin Gudang");

    let shipment = state
        .shipments
        .create(
            &admin,
            CreateShipmentInput {
                delivery_note_number: "SJ-900".to_string(),
                company: "PT Maju Jaya".to_string(),
                destination: "Surabaya".to_string(),
                driver_id: Some(first.id),
                quantity: 10,
                ship_date: NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"),
                tracking_url: None,
            },
        )
        .await
        .expect("create");

    let native = Arc::new(ChannelLocationSource::new("native"));
    let tracker = state.location_tracker(
        Arc::new(StaticPermission(PermissionState::Granted)),
        Some(native.clone() as Arc<dyn LocationSource>),
        Arc::new(ChannelLocationSource::new("browser")),
    );
    tracker.start_tracking(shipment.id).await.expect("start");
    assert_eq!(tracker.tracking().await, Some(shipment.id));

    state
        .shipments
        .reassign_driver(&admin, shipment.id, Some(second.id))
        .await
        .expect("reassign");

    wait_until("tracker idle", || tracker.state() == TrackerState::Idle).await;
    wait_until("watch dropped", || native.watcher_count() == 0).await;
    wait_for_no_shipment(&tracker).await;

    assert_eq!(native.push(Position::new(-7.25, 112.75)), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = gateway
        .get_shipment(shipment.id)
        .await
        .expect("get")
        .expect("shipment");
    assert_eq!(record.current_lat, None);
    assert_eq!(record.supir_id, Some(second.id));
}
