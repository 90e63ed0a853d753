use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::store::{FetchTicket, ShipmentStore};
use crate::dto::ShipmentRecord;
use crate::errors::ServiceError;
use crate::gateway::{ChangeFeed, ChangeKind, ChangeSubscription, ShipmentGateway, Table};
use crate::normalize::to_app;
use crate::notifications::Notifier;

/// Lifecycle of a realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Idle,
    RefetchInFlight,
}

type FetchOutcome = (FetchTicket, Result<Vec<ShipmentRecord>, ServiceError>);

/// Keeps a [`ShipmentStore`] in sync with the backend's change feed.
///
/// Every change notification triggers a full re-fetch. Fetches are tagged
/// with a sequence number so that only the latest issued one is applied.
#[derive(Clone)]
pub struct Reconciler {
    shipments: Arc<dyn ShipmentGateway>,
    feed: Arc<dyn ChangeFeed>,
    store: Arc<ShipmentStore>,
    notifier: Notifier,
    coalesce_window: Duration,
}

impl Reconciler {
    pub fn new(
        shipments: Arc<dyn ShipmentGateway>,
        feed: Arc<dyn ChangeFeed>,
        store: Arc<ShipmentStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            shipments,
            feed,
            store,
            notifier,
            coalesce_window: Duration::ZERO,
        }
    }

    /// Folds notifications arriving within `window` of each other into one
    /// trailing re-fetch. Zero disables coalescing.
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    /// Opens the change feed, then issues the initial fetch.
    #[instrument(skip(self))]
    pub async fn subscribe(&self) -> Result<RealtimeHandle, ServiceError> {
        let subscription = self.feed.subscribe(Table::Shipments, &ChangeKind::ALL).await?;
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let state_tx = Arc::new(state_tx);

        let task = tokio::spawn(self.clone().run(subscription, state_tx.clone()));
        info!("realtime subscription opened");

        Ok(RealtimeHandle {
            task: Some(task),
            state_tx,
            state_rx,
            store: self.store.clone(),
        })
    }

    fn spawn_fetch(&self, fetches: &mut JoinSet<FetchOutcome>) {
        let ticket = self.store.begin_fetch();
        let gateway = self.shipments.clone();
        debug!(seq = ticket.seq(), "starting shipment fetch");
        fetches.spawn(async move { (ticket, gateway.list_shipments().await) });
    }

    fn finish_fetch(&self, (ticket, result): FetchOutcome) {
        match result {
            Ok(records) => {
                let shipments = records.into_iter().map(to_app).collect();
                if self.store.complete_fetch(ticket, shipments) {
                    debug!(seq = ticket.seq(), "shipment collection refreshed");
                }
            }
            // Local state stays as it was.
            Err(e) if self.store.is_current(ticket) => {
                self.notifier.error("Refreshing shipments", &e);
            }
            Err(e) => {
                debug!(seq = ticket.seq(), error = %e, "stale fetch failed");
            }
        }
    }

    async fn run(self, mut subscription: ChangeSubscription, state: Arc<watch::Sender<SubscriptionState>>) {
        let mut fetches = JoinSet::new();
        self.spawn_fetch(&mut fetches);
        state.send_replace(SubscriptionState::RefetchInFlight);

        loop {
            tokio::select! {
                notification = subscription.recv() => {
                    let Some(notification) = notification else {
                        warn!("change feed ended");
                        break;
                    };
                    debug!(kind = %notification.kind, record_id = ?notification.record_id, "change received");

                    if !self.coalesce_window.is_zero() {
                        tokio::time::sleep(self.coalesce_window).await;
                        let mut folded = 0usize;
                        while subscription.try_recv().is_some() {
                            folded += 1;
                        }
                        if folded > 0 {
                            debug!(folded, "coalesced change notifications");
                        }
                    }

                    self.spawn_fetch(&mut fetches);
                    state.send_replace(SubscriptionState::RefetchInFlight);
                }
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    match joined {
                        Ok(outcome) => self.finish_fetch(outcome),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!(error = %e, "shipment fetch task panicked"),
                    }
                    if fetches.is_empty() {
                        state.send_replace(SubscriptionState::Idle);
                    }
                }
            }
        }

        subscription.close();
        self.store.invalidate_pending();
        state.send_replace(SubscriptionState::Unsubscribed);
    }
}

/// Owner of a running realtime subscription.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct RealtimeHandle {
    task: Option<JoinHandle<()>>,
    state_tx: Arc<watch::Sender<SubscriptionState>>,
    state_rx: watch::Receiver<SubscriptionState>,
    store: Arc<ShipmentStore>,
}

impl RealtimeHandle {
    pub fn state(&self) -> SubscriptionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state_rx.clone()
    }

    pub fn store(&self) -> &Arc<ShipmentStore> {
        &self.store
    }

    /// Closes the change feed. No fetch result is applied afterwards.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.store.invalidate_pending();
            self.state_tx.send_replace(SubscriptionState::Unsubscribed);
            info!("realtime subscription closed");
        }
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
