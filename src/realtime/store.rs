use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::filter::{apply_filters, FilterSpec};
use crate::models::Shipment;

/// Filtered view published to presentation consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentView {
    pub filter: FilterSpec,
    pub shipments: Vec<Shipment>,
    /// Size of the unfiltered collection.
    pub total: usize,
    /// Incremented on every republish.
    pub revision: u64,
}

/// Sequence number handed out when a full fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn seq(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct StoreState {
    all: Vec<Shipment>,
    filter: FilterSpec,
    issued_seq: u64,
    revision: u64,
}

/// Single owner of the local shipment collection.
///
/// Every mutation re-derives the filtered view and republishes it. The lock
/// is never held across an await.
#[derive(Debug)]
pub struct ShipmentStore {
    state: Mutex<StoreState>,
    view: watch::Sender<ShipmentView>,
}

impl ShipmentStore {
    pub fn new() -> Self {
        let (view, _) = watch::channel(ShipmentView::default());
        Self {
            state: Mutex::new(StoreState::default()),
            view,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn republish(&self, state: &mut StoreState) {
        state.revision += 1;
        let view = ShipmentView {
            filter: state.filter.clone(),
            shipments: apply_filters(&state.all, &state.filter),
            total: state.all.len(),
            revision: state.revision,
        };
        self.view.send_replace(view);
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ShipmentView> {
        self.view.subscribe()
    }

    /// The currently published view.
    pub fn view(&self) -> ShipmentView {
        self.view.borrow().clone()
    }

    /// The unfiltered collection.
    pub fn snapshot(&self) -> Vec<Shipment> {
        self.lock().all.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Shipment> {
        self.lock().all.iter().find(|s| s.id == id).cloned()
    }

    pub fn filter(&self) -> FilterSpec {
        self.lock().filter.clone()
    }

    pub fn set_filter(&self, filter: FilterSpec) {
        let mut state = self.lock();
        state.filter = filter;
        self.republish(&mut state);
    }

    /// Replaces the collection unconditionally.
    pub fn replace_all(&self, shipments: Vec<Shipment>) {
        let mut state = self.lock();
        state.all = shipments;
        self.republish(&mut state);
    }

    /// Inserts or replaces a single shipment after a successful remote write.
    pub fn upsert(&self, shipment: Shipment) {
        let mut state = self.lock();
        match state.all.iter_mut().find(|s| s.id == shipment.id) {
            Some(existing) => *existing = shipment,
            None => state.all.insert(0, shipment),
        }
        self.republish(&mut state);
    }

    pub fn remove(&self, id: Uuid) -> Option<Shipment> {
        let mut state = self.lock();
        let index = state.all.iter().position(|s| s.id == id)?;
        let removed = state.all.remove(index);
        self.republish(&mut state);
        Some(removed)
    }

    /// Issues the next fetch sequence number.
    pub fn begin_fetch(&self) -> FetchTicket {
        let mut state = self.lock();
        state.issued_seq += 1;
        FetchTicket(state.issued_seq)
    }

    pub fn is_current(&self, ticket: FetchTicket) -> bool {
        self.lock().issued_seq == ticket.0
    }

    /// Applies a fetch result if it belongs to the latest issued fetch.
    ///
    /// Returns `false` when the result was discarded as stale.
    pub fn complete_fetch(&self, ticket: FetchTicket, shipments: Vec<Shipment>) -> bool {
        let mut state = self.lock();
        if state.issued_seq != ticket.0 {
            debug!(
                seq = ticket.0,
                latest = state.issued_seq,
                "discarding stale fetch result"
            );
            return false;
        }
        state.all = shipments;
        self.republish(&mut state);
        true
    }

    /// Makes every outstanding fetch stale.
    pub fn invalidate_pending(&self) {
        self.lock().issued_seq += 1;
    }
}

impl Default for ShipmentStore {
    fn default() -> Self {
        Self::new()
    }
}
