//! Multi-criteria filtering of an in-memory shipment collection.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{Shipment, ShipmentStatus};

/// Issue-presence criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueFilter {
    #[default]
    Any,
    WithIssue,
    WithoutIssue,
}

/// Describes which subset of shipments a view wants to display.
///
/// `None` on a selector means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<ShipmentStatus>,
    pub driver: Option<String>,
    pub company: Option<String>,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub issue: IssueFilter,
}

impl FilterSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn with_status(mut self, status: ShipmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_search(mut self, query: impl Into<String>) -> Self {
        self.search = query.into();
        self
    }

    pub fn with_issue(mut self, issue: IssueFilter) -> Self {
        self.issue = issue;
        self
    }

    /// True when no criterion is active.
    pub fn is_all(&self) -> bool {
        self.date_range().is_none()
            && self.status.is_none()
            && self.driver.is_none()
            && self.company.is_none()
            && self.normalized_query().is_none()
            && self.issue == IssueFilter::Any
    }

    /// The date range only applies when both bounds are set.
    fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_from.zip(self.date_to)
    }

    fn normalized_query(&self) -> Option<String> {
        let query = self.search.trim().to_lowercase();
        (!query.is_empty()).then_some(query)
    }

    /// Whether a single shipment satisfies every active criterion.
    pub fn matches(&self, shipment: &Shipment) -> bool {
        self.matches_with_query(shipment, self.normalized_query().as_deref())
    }

    fn matches_with_query(&self, shipment: &Shipment, query: Option<&str>) -> bool {
        if let Some((from, to)) = self.date_range() {
            if shipment.ship_date < from || shipment.ship_date > to {
                return false;
            }
        }

        if let Some(status) = self.status {
            if shipment.status != status {
                return false;
            }
        }

        // Exact, case-sensitive: choices come from the collection itself.
        if let Some(driver) = &self.driver {
            if shipment.driver_name.as_deref() != Some(driver.as_str()) {
                return false;
            }
        }

        if let Some(company) = &self.company {
            if &shipment.company != company {
                return false;
            }
        }

        if let Some(query) = query {
            let hit = [
                Some(shipment.delivery_note_number.as_str()),
                Some(shipment.company.as_str()),
                Some(shipment.destination.as_str()),
                shipment.driver_name.as_deref(),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(query));
            if !hit {
                return false;
            }
        }

        match self.issue {
            IssueFilter::Any => true,
            IssueFilter::WithIssue => shipment.has_issue(),
            IssueFilter::WithoutIssue => !shipment.has_issue(),
        }
    }
}

/// Returns the shipments matching `spec`, preserving input order.
pub fn apply_filters(all: &[Shipment], spec: &FilterSpec) -> Vec<Shipment> {
    let query = spec.normalized_query();
    all.iter()
        .filter(|shipment| spec.matches_with_query(shipment, query.as_deref()))
        .cloned()
        .collect()
}

/// Sorted distinct company names, for populating a company selector.
pub fn distinct_companies(all: &[Shipment]) -> Vec<String> {
    all.iter()
        .map(|s| s.company.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Sorted distinct driver names, for populating a driver selector.
pub fn distinct_drivers(all: &[Shipment]) -> Vec<String> {
    all.iter()
        .filter_map(|s| s.driver_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
