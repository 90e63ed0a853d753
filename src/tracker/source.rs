use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::ServiceError;

/// A device position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    /// Accuracy radius in metres, when the provider reports one.
    pub accuracy_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy_m: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_accuracy(mut self, metres: f64) -> Self {
        self.accuracy_m = Some(metres);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
}

#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request_permission(&self) -> Result<PermissionState, ServiceError>;
}

/// Permission provider that always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionState);

#[async_trait]
impl PermissionProvider for StaticPermission {
    async fn request_permission(&self) -> Result<PermissionState, ServiceError> {
        Ok(self.0)
    }
}

pub type PositionStream = BoxStream<'static, Result<Position, ServiceError>>;

/// A geolocation API able to stream positions.
#[async_trait]
pub trait LocationSource: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a continuous position stream.
    async fn watch(&self) -> Result<PositionStream, ServiceError>;

    async fn current_position(&self) -> Result<Position, ServiceError>;
}

/// Location source fed by pushing positions into it.
///
/// Used for replaying recorded tracks and in tests. An unavailable source
/// fails every call, like a platform API that is missing.
#[derive(Debug)]
pub struct ChannelLocationSource {
    name: String,
    sender: broadcast::Sender<Position>,
    last: Mutex<Option<Position>>,
    available: bool,
}

impl ChannelLocationSource {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(32);
        Self {
            name: name.into(),
            sender,
            last: Mutex::new(None),
            available: true,
        }
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            available: false,
            ..Self::new(name)
        }
    }

    /// Delivers a position to every open watch. Returns the number of
    /// watchers that received it.
    pub fn push(&self, position: Position) -> usize {
        match self.last.lock() {
            Ok(mut last) => *last = Some(position),
            Err(poisoned) => *poisoned.into_inner() = Some(position),
        }
        self.sender.send(position).unwrap_or(0)
    }

    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn ensure_available(&self) -> Result<(), ServiceError> {
        if self.available {
            Ok(())
        } else {
            Err(ServiceError::LocationUnavailable(format!(
                "{} location API is not available",
                self.name
            )))
        }
    }
}

#[async_trait]
impl LocationSource for ChannelLocationSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn watch(&self) -> Result<PositionStream, ServiceError> {
        self.ensure_available()?;
        let receiver = self.sender.subscribe();
        let positions = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(position) => return Some((Ok(position), receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(positions.boxed())
    }

    async fn current_position(&self) -> Result<Position, ServiceError> {
        self.ensure_available()?;
        let last = match self.last.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        };
        last.ok_or_else(|| {
            ServiceError::LocationUnavailable(format!("{} has no position fix yet", self.name))
        })
    }
}
