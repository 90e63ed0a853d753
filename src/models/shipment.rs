use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Shipment status enumeration
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShipmentStatus {
    Pending,
    Delivered,
    Failed,
}

impl ShipmentStatus {
    /// Human readable label used in reports and exports.
    pub fn label(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "Pending",
            ShipmentStatus::Delivered => "Delivered",
            ShipmentStatus::Failed => "Failed",
        }
    }
}

/// A single delivery tracked from creation to a delivered or failed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub id: Uuid,
    pub delivery_note_number: String,
    pub company: String,
    pub destination: String,
    pub driver_id: Option<Uuid>,
    /// Display name of the assigned driver, joined from the driver directory.
    pub driver_name: Option<String>,
    pub quantity: u32,
    pub ship_date: NaiveDate,
    pub arrival_date: Option<NaiveDate>,
    pub arrival_time: Option<NaiveTime>,
    pub status: ShipmentStatus,
    /// Constraint or issue reported for this delivery.
    pub issue: Option<String>,
    pub tracking_url: Option<String>,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

/// Requested status transition together with the data each status requires.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    Pending,
    Delivered {
        arrival_date: NaiveDate,
        arrival_time: NaiveTime,
    },
    Failed {
        issue: String,
    },
}

impl StatusChange {
    pub fn status(&self) -> ShipmentStatus {
        match self {
            StatusChange::Pending => ShipmentStatus::Pending,
            StatusChange::Delivered { .. } => ShipmentStatus::Delivered,
            StatusChange::Failed { .. } => ShipmentStatus::Failed,
        }
    }
}

impl Shipment {
    /// Whether an issue note is present (blank notes count as absent).
    pub fn has_issue(&self) -> bool {
        self.issue
            .as_deref()
            .map(|note| !note.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_position(&self) -> bool {
        self.current_lat.is_some() && self.current_lng.is_some()
    }

    /// Tracking link for this shipment: the stored override, or one derived
    /// from the public tracking base URL.
    pub fn tracking_link(&self, base_url: &str) -> String {
        match &self.tracking_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!("{}/track/{}", base_url.trim_end_matches('/'), self.id),
        }
    }

    /// Checks the status-dependent field invariants.
    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        match self.status {
            ShipmentStatus::Delivered => {
                if self.arrival_date.is_none() || self.arrival_time.is_none() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Delivered shipment {} must have an arrival date and time",
                        self.id
                    )));
                }
                if self.issue.is_some() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Delivered shipment {} cannot carry an issue note",
                        self.id
                    )));
                }
            }
            ShipmentStatus::Failed => {
                if !self.has_issue() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Failed shipment {} must describe the issue",
                        self.id
                    )));
                }
            }
            ShipmentStatus::Pending => {
                if self.arrival_date.is_some() || self.arrival_time.is_some() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Pending shipment {} cannot have an arrival date or time",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies a status change, setting and clearing the dependent fields.
    ///
    /// Returns the previous status. The shipment is left untouched on error.
    pub fn apply_status(&mut self, change: &StatusChange) -> Result<ShipmentStatus, ServiceError> {
        let previous = self.status;
        match change {
            StatusChange::Pending => {
                self.arrival_date = None;
                self.arrival_time = None;
            }
            StatusChange::Delivered {
                arrival_date,
                arrival_time,
            } => {
                self.arrival_date = Some(*arrival_date);
                self.arrival_time = Some(*arrival_time);
                self.issue = None;
            }
            StatusChange::Failed { issue } => {
                let issue = issue.trim();
                if issue.is_empty() {
                    return Err(ServiceError::InvalidInput(
                        "A failed delivery requires an issue note".to_string(),
                    ));
                }
                self.issue = Some(issue.to_string());
            }
        }
        self.status = change.status();
        Ok(previous)
    }
}

/// Partial application-side shipment used for inserts and edits.
///
/// Mirrors [`Shipment`]; `None` means "not part of this write". Nullable
/// fields use `Some(None)` to clear the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShipmentPatch {
    pub id: Option<Uuid>,
    pub delivery_note_number: Option<String>,
    pub company: Option<String>,
    pub destination: Option<String>,
    pub driver_id: Option<Option<Uuid>>,
    pub quantity: Option<u32>,
    pub ship_date: Option<NaiveDate>,
    pub arrival_date: Option<Option<NaiveDate>>,
    pub arrival_time: Option<Option<NaiveTime>>,
    pub status: Option<ShipmentStatus>,
    pub issue: Option<Option<String>>,
    pub tracking_url: Option<Option<String>>,
    pub current_lat: Option<Option<f64>>,
    pub current_lng: Option<Option<f64>>,
    pub updated_by: Option<Option<String>>,
}

impl From<&Shipment> for ShipmentPatch {
    fn from(s: &Shipment) -> Self {
        Self {
            id: Some(s.id),
            delivery_note_number: Some(s.delivery_note_number.clone()),
            company: Some(s.company.clone()),
            destination: Some(s.destination.clone()),
            driver_id: Some(s.driver_id),
            quantity: Some(s.quantity),
            ship_date: Some(s.ship_date),
            arrival_date: Some(s.arrival_date),
            arrival_time: Some(s.arrival_time),
            status: Some(s.status),
            issue: Some(s.issue.clone()),
            tracking_url: Some(s.tracking_url.clone()),
            current_lat: Some(s.current_lat),
            current_lng: Some(s.current_lng),
            updated_by: Some(s.updated_by.clone()),
        }
    }
}

impl ShipmentPatch {
    /// The status-dependent columns of `s`, for writing a status update.
    pub fn status_fields(s: &Shipment) -> Self {
        Self {
            status: Some(s.status),
            arrival_date: Some(s.arrival_date),
            arrival_time: Some(s.arrival_time),
            issue: Some(s.issue.clone()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn shipment(status: ShipmentStatus, ship_date: &str) -> Shipment {
        Shipment {
            id: Uuid::new_v4(),
            delivery_note_number: "SJ-0001".to_string(),
            company: "PT Maju Jaya".to_string(),
            destination: "Surabaya".to_string(),
            driver_id: None,
            driver_name: Some("Budi".to_string()),
            quantity: 10,
            ship_date: ship_date.parse().expect("valid date"),
            arrival_date: None,
            arrival_time: None,
            status,
            issue: None,
            tracking_url: None,
            current_lat: None,
            current_lng: None,
            created_at: None,
            updated_at: None,
            updated_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::shipment;
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(ShipmentStatus::Delivered.to_string(), "delivered");
        assert_eq!(
            "failed".parse::<ShipmentStatus>().ok(),
            Some(ShipmentStatus::Failed)
        );
        assert!("shipped".parse::<ShipmentStatus>().is_err());
    }

    #[test]
    fn delivering_sets_arrival_and_clears_issue() {
        let mut s = shipment(ShipmentStatus::Failed, "2024-01-01");
        s.issue = Some("Road closed".into());
        let previous = s
            .apply_status(&StatusChange::Delivered {
                arrival_date: NaiveDate::from_ymd_opt(2024, 1, 3).expect("date"),
                arrival_time: NaiveTime::from_hms_opt(14, 30, 0).expect("time"),
            })
            .expect("delivered");

        assert_eq!(previous, ShipmentStatus::Failed);
        assert_eq!(s.status, ShipmentStatus::Delivered);
        assert!(s.arrival_date.is_some());
        assert!(s.arrival_time.is_some());
        assert_eq!(s.issue, None);
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn failing_requires_issue_note() {
        let mut s = shipment(ShipmentStatus::Pending, "2024-01-01");
        let result = s.apply_status(&StatusChange::Failed {
            issue: "   ".into(),
        });
        assert_matches!(result, Err(ServiceError::InvalidInput(_)));
        assert_eq!(s.status, ShipmentStatus::Pending);
    }

    #[test]
    fn back_to_pending_clears_arrival() {
        let mut s = shipment(ShipmentStatus::Pending, "2024-01-01");
        s.apply_status(&StatusChange::Delivered {
            arrival_date: NaiveDate::from_ymd_opt(2024, 1, 2).expect("date"),
            arrival_time: NaiveTime::from_hms_opt(8, 0, 0).expect("time"),
        })
        .expect("delivered");
        s.apply_status(&StatusChange::Pending).expect("pending");
        assert_eq!(s.arrival_date, None);
        assert_eq!(s.arrival_time, None);
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn invariants_reject_inconsistent_records() {
        let mut s = shipment(ShipmentStatus::Delivered, "2024-01-01");
        assert!(s.check_invariants().is_err());
        s.status = ShipmentStatus::Failed;
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn tracking_link_prefers_override() {
        let mut s = shipment(ShipmentStatus::Pending, "2024-01-01");
        assert_eq!(
            s.tracking_link("https://track.example.com/"),
            format!("https://track.example.com/track/{}", s.id)
        );
        s.tracking_url = Some("https://carrier.example/abc".into());
        assert_eq!(
            s.tracking_link("https://track.example.com"),
            "https://carrier.example/abc"
        );
    }
}
