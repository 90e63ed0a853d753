use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::errors::ServiceError;
use crate::filter::{apply_filters, FilterSpec};
use crate::models::{Shipment, ShipmentStatus};
use crate::realtime::ShipmentStore;

const UNASSIGNED: &str = "Unassigned";

const CSV_HEADER: [&str; 11] = [
    "ID",
    "Delivery Note",
    "Company",
    "Destination",
    "Driver",
    "Qty",
    "Ship Date",
    "Arrival Date",
    "Arrival Time",
    "Status",
    "Issue",
];

/// Summary figures over a set of shipments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentReport {
    pub total: usize,
    pub pending: usize,
    pub delivered: usize,
    pub failed: usize,
    pub total_quantity: u64,
    /// Delivered share of all shipments, 0.0 for an empty set.
    pub delivery_rate: f64,
    /// Shipments with an issue note that are not delivered.
    pub open_issues: usize,
    pub by_driver: BTreeMap<String, usize>,
    pub by_company: BTreeMap<String, usize>,
}

impl ShipmentReport {
    pub fn from_shipments(shipments: &[Shipment]) -> Self {
        let mut report = ShipmentReport {
            total: shipments.len(),
            ..Default::default()
        };

        for shipment in shipments {
            match shipment.status {
                ShipmentStatus::Pending => report.pending += 1,
                ShipmentStatus::Delivered => report.delivered += 1,
                ShipmentStatus::Failed => report.failed += 1,
            }
            report.total_quantity += u64::from(shipment.quantity);
            if shipment.has_issue() && shipment.status != ShipmentStatus::Delivered {
                report.open_issues += 1;
            }
            let driver = shipment
                .driver_name
                .clone()
                .unwrap_or_else(|| UNASSIGNED.to_string());
            *report.by_driver.entry(driver).or_default() += 1;
            *report
                .by_company
                .entry(shipment.company.clone())
                .or_default() += 1;
        }

        if report.total > 0 {
            report.delivery_rate = report.delivered as f64 / report.total as f64;
        }
        report
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_csv_row<W: Write>(writer: &mut W, fields: &[String]) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")
}

/// Writes shipments as RFC 4180 CSV with a header row.
pub fn export_csv<W: Write>(shipments: &[Shipment], mut writer: W) -> Result<(), ServiceError> {
    let header: Vec<String> = CSV_HEADER.iter().map(|h| h.to_string()).collect();
    write_csv_row(&mut writer, &header).map_err(|e| ServiceError::Other(e.into()))?;

    for s in shipments {
        let row = vec![
            s.id.to_string(),
            s.delivery_note_number.clone(),
            s.company.clone(),
            s.destination.clone(),
            s.driver_name.clone().unwrap_or_default(),
            s.quantity.to_string(),
            s.ship_date.format("%Y-%m-%d").to_string(),
            s.arrival_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            s.arrival_time
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_default(),
            s.status.label().to_string(),
            s.issue.clone().unwrap_or_default(),
        ];
        write_csv_row(&mut writer, &row).map_err(|e| ServiceError::Other(e.into()))?;
    }
    writer.flush().map_err(|e| ServiceError::Other(e.into()))
}

/// Reports over the locally cached collection.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<ShipmentStore>,
}

impl ReportService {
    pub fn new(store: Arc<ShipmentStore>) -> Self {
        Self { store }
    }

    fn selection(&self, filter: &FilterSpec) -> Vec<Shipment> {
        apply_filters(&self.store.snapshot(), filter)
    }

    #[instrument(skip(self))]
    pub fn summary(&self, filter: &FilterSpec) -> ShipmentReport {
        ShipmentReport::from_shipments(&self.selection(filter))
    }

    /// Exports the shipments matching `filter`; returns the row count.
    #[instrument(skip(self, writer))]
    pub fn export<W: Write>(&self, filter: &FilterSpec, writer: W) -> Result<usize, ServiceError> {
        let rows = self.selection(filter);
        export_csv(&rows, writer)?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shipment::fixtures::shipment;
    use chrono::{NaiveDate, NaiveTime};

    fn sample() -> Vec<Shipment> {
        let mut delivered = shipment(ShipmentStatus::Delivered, "2024-01-02");
        delivered.arrival_date = NaiveDate::from_ymd_opt(2024, 1, 3);
        delivered.arrival_time = NaiveTime::from_hms_opt(9, 15, 0);
        delivered.quantity = 5;

        let mut failed = shipment(ShipmentStatus::Failed, "2024-01-04");
        failed.company = "CV \"Sentosa\", Tbk".to_string();
        failed.issue = Some("Ban bocor".to_string());
        failed.driver_name = None;

        vec![shipment(ShipmentStatus::Pending, "2024-01-01"), delivered, failed]
    }

    #[test]
    fn summarizes_status_driver_and_company() {
        let report = ShipmentReport::from_shipments(&sample());
        assert_eq!(report.total, 3);
        assert_eq!((report.pending, report.delivered, report.failed), (1, 1, 1));
        assert_eq!(report.total_quantity, 25);
        assert_eq!(report.open_issues, 1);
        assert!((report.delivery_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(report.by_driver.get("Budi"), Some(&2));
        assert_eq!(report.by_driver.get(UNASSIGNED), Some(&1));
        assert_eq!(report.by_company.len(), 2);
    }

    #[test]
    fn empty_report_has_zero_rate() {
        let report = ShipmentReport::from_shipments(&[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.delivery_rate, 0.0);
    }

    #[test]
    fn csv_quotes_fields_with_separators() {
        let mut out = Vec::new();
        export_csv(&sample(), &mut out).expect("export");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.split("\r\n").collect();

        assert_eq!(
            lines[0],
            "ID,Delivery Note,Company,Destination,Driver,Qty,Ship Date,Arrival Date,Arrival Time,Status,Issue"
        );
        assert!(lines[2].ends_with(",5,2024-01-02,2024-01-03,09:15,Delivered,"));
        assert!(lines[3].contains("\"CV \"\"Sentosa\"\", Tbk\""));
        assert!(lines[3].ends_with(",Failed,Ban bocor"));
        assert_eq!(lines.len(), 5);
    }
}
