use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use logitrack::dto::ShipmentRecordPatch;
use logitrack::errors::ServiceError;
use logitrack::gateway::{
    ChangeFeed, ChangeKind, LocationSink, LocationUpdate, RestGateway, ShipmentGateway, Table,
};
use logitrack::models::ShipmentStatus;

const API_KEY: &str = "anon-key";
const TOKEN: &str = "user-token";

fn gateway(server: &MockServer) -> RestGateway {
    RestGateway::new(server.uri(), API_KEY, Some(TOKEN.to_string()))
}

fn row(id: Uuid, note: &str) -> serde_json::Value {
    json!({
        "id": id,
        "no_surat_jalan": note,
        "perusahaan": "PT Maju Jaya",
        "tujuan": "Semarang",
        "supir_id": null,
        "supir": null,
        "tanggal_kirim": "2024-03-01",
        "tanggal_tiba": null,
        "waktu_tiba": null,
        "status": "pending",
        "kendala": null,
        "qty": 12,
        "tracking_url": null,
        "current_lat": null,
        "current_lng": null,
        "created_at": "2024-03-01T08:00:00Z",
        "updated_at": "2024-03-01T08:00:00Z",
        "updated_by": "admin"
    })
}

#[tokio::test]
async fn list_sends_credentials_and_embeds_driver() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    let driver_id = Uuid::new_v4();
    let mut body = row(id, "SJ-100");
    body["supir_id"] = json!(driver_id);
    body["supir"] = json!({ "id": driver_id, "nama": "Andi", "plat_nomor": "H 77 AB" });
    body["tanggal_tiba"] = json!("2024-03-02");
    body["waktu_tiba"] = json!("13:45:00");
    body["status"] = json!("delivered");

    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .and(query_param("select", "*,supir(id,nama,plat_nomor)"))
        .and(query_param("order", "tanggal_kirim.desc"))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([body])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = gateway(&server).list_shipments().await.expect("list");

    assert_eq!(rows.len(), 1);
    let record = &rows[0];
    assert_eq!(record.id, id);
    assert_eq!(record.status, ShipmentStatus::Delivered);
    assert_eq!(record.tanggal_tiba, NaiveDate::from_ymd_opt(2024, 3, 2));
    assert_eq!(record.supir.as_ref().map(|d| d.nama.as_str()), Some("Andi"));
}

#[tokio::test]
async fn malformed_rows_are_skipped() {
    let server = MockServer::start().await;
    let good = Uuid::new_v4();
    let mut blank_note = row(Uuid::new_v4(), "  ");
    blank_note["status"] = json!("pending");
    let missing_date = json!({ "id": Uuid::new_v4(), "no_surat_jalan": "SJ-X", "perusahaan": "CV A", "status": "pending" });

    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            blank_note,
            row(good, "SJ-200"),
            missing_date,
            { "id": "not-a-uuid" }
        ])))
        .mount(&server)
        .await;

    let rows = gateway(&server).list_shipments().await.expect("list");

    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![good]);
}

#[tokio::test]
async fn error_status_maps_to_remote_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
        .mount(&server)
        .await;

    let result = gateway(&server).list_shipments().await;

    assert_matches!(
        result,
        Err(ServiceError::RemoteStatus { status, ref message })
            if status == http::StatusCode::UNAUTHORIZED && message == "JWT expired"
    );
}

#[tokio::test]
async fn get_returns_none_for_empty_result() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .and(query_param("id", format!("eq.{}", id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(gateway(&server).get_shipment(id).await.expect("get"), None);
}

#[tokio::test]
async fn insert_asks_for_the_written_row() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rest/v1/pengiriman"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({
            "no_surat_jalan": "SJ-300",
            "perusahaan": "PT Maju Jaya",
            "tanggal_kirim": "2024-03-01",
            "status": "pending",
            "qty": 12
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(id, "SJ-300")])))
        .expect(1)
        .mount(&server)
        .await;

    let patch = ShipmentRecordPatch {
        no_surat_jalan: Some("SJ-300".to_string()),
        perusahaan: Some("PT Maju Jaya".to_string()),
        tanggal_kirim: NaiveDate::from_ymd_opt(2024, 3, 1),
        status: Some(ShipmentStatus::Pending),
        qty: Some(12),
        ..Default::default()
    };
    let record = gateway(&server).insert_shipment(&patch).await.expect("insert");

    assert_eq!(record.id, id);
    assert_eq!(record.qty, 12);
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/pengiriman"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let patch = ShipmentRecordPatch {
        qty: Some(3),
        ..Default::default()
    };
    let result = gateway(&server).update_shipment(Uuid::new_v4(), &patch).await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn location_update_calls_function_with_bearer() {
    let server = MockServer::start().await;
    let shipment_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/functions/v1/update-location"))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(body_json(json!({ "shipmentId": shipment_id, "lat": -6.2, "lng": 106.8 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "Location updated",
            "timestamp": "2024-03-01T09:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ack = gateway(&server)
        .update_location(&LocationUpdate {
            shipment_id,
            lat: -6.2,
            lng: 106.8,
            updated_at: Utc::now(),
        })
        .await
        .expect("update");

    assert_eq!(ack.message, "Location updated");
}

#[tokio::test]
async fn location_function_errors_are_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/functions/v1/update-location"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Missing shipmentId"))
        .mount(&server)
        .await;

    let result = gateway(&server)
        .update_location(&LocationUpdate {
            shipment_id: Uuid::new_v4(),
            lat: 0.0,
            lng: 0.0,
            updated_at: Utc::now(),
        })
        .await;

    assert_matches!(result, Err(ServiceError::RemoteStatus { status, .. }) if status == http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn polling_feed_reports_new_rows() {
    let server = MockServer::start().await;
    let existing = Uuid::new_v4();
    let added = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(existing, "SJ-1")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/pengiriman"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row(existing, "SJ-1"),
            row(added, "SJ-2")
        ])))
        .mount(&server)
        .await;

    let mut subscription = gateway(&server)
        .with_poll_interval(Duration::from_millis(50))
        .subscribe(Table::Shipments, &ChangeKind::ALL)
        .await
        .expect("subscribe");

    let change = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("timely")
        .expect("change");
    assert_eq!(change.table, Table::Shipments);
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.record_id, Some(added));
}
