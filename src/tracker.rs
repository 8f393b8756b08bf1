//! Device tracker view over the scheduler's cached position.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::accessory::Accessory;
use crate::scheduler::PositionState;

/// Where a tracked position comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Gps,
}

/// Read-only tracker entity for one accessory
pub struct DeviceTracker {
    unique_id: String,
    name: String,
    state: watch::Receiver<PositionState>,
}

impl DeviceTracker {
    pub fn new(accessory: &Accessory, state: watch::Receiver<PositionState>) -> Self {
        Self {
            unique_id: accessory.identifier().to_string(),
            name: accessory.name().to_string(),
            state,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_type(&self) -> SourceType {
        SourceType::Gps
    }

    pub fn latitude(&self) -> Option<f64> {
        self.state.borrow().snapshot.as_ref().map(|r| r.latitude)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.state.borrow().snapshot.as_ref().map(|r| r.longitude)
    }

    /// Horizontal accuracy in meters
    pub fn location_accuracy(&self) -> Option<f64> {
        self.state.borrow().snapshot.as_ref().map(|r| r.horizontal_accuracy)
    }

    /// When the accessory was last observed
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().snapshot.as_ref().map(|r| r.timestamp)
    }

    /// Whether the most recent update succeeded
    pub fn available(&self) -> bool {
        self.state.borrow().last_update_success
    }

    /// Wait for the scheduler to publish a new state
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            unique_id: self.unique_id.clone(),
            name: self.name.clone(),
            source_type: self.source_type(),
            latitude: self.latitude(),
            longitude: self.longitude(),
            accuracy: self.location_accuracy(),
            last_seen: self.last_seen(),
            available: self.available(),
        }
    }
}

/// Serializable snapshot of a tracker, for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSummary {
    pub unique_id: String,
    pub name: String,
    pub source_type: SourceType,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub available: bool,
}
