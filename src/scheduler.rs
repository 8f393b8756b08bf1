//! Update Scheduler
//!
//! Polls the hub on a fixed period, one fetch at a time, and publishes the
//! last known position to observers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::TrackerHub;
use crate::report::LocationReport;

/// Default polling period (30 minutes)
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1800);

/// Cached position and health of the polling loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionState {
    /// Latest successfully fetched report
    pub snapshot: Option<LocationReport>,
    pub last_update_success: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Set once the first refresh has completed, whatever its outcome
    pub ready: bool,
}

/// Periodic position poller for one hub
pub struct UpdateScheduler {
    hub: Arc<TrackerHub>,
    interval: Duration,
    state: watch::Sender<PositionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UpdateScheduler {
    pub fn new(hub: Arc<TrackerHub>, interval: Duration) -> Self {
        let (state, _) = watch::channel(PositionState::default());
        Self {
            hub,
            interval,
            state,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn hub(&self) -> &Arc<TrackerHub> {
        &self.hub
    }

    pub fn subscribe(&self) -> watch::Receiver<PositionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PositionState {
        self.state.borrow().clone()
    }

    /// Run the first refresh, then start the periodic loop.
    ///
    /// Returns the state published by the first refresh.
    pub async fn start(&mut self) -> PositionState {
        if self.task.is_some() {
            warn!("Scheduler already started");
            return self.state();
        }

        refresh(&self.hub, &self.state).await;
        info!("First refresh done, polling every {:?}", self.interval);

        self.task = Some(tokio::spawn(poll_loop(
            self.hub.clone(),
            self.interval,
            self.state.clone(),
            self.cancel.clone(),
        )));

        self.state()
    }

    /// Stop polling; waits for an in-flight fetch to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Polling task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for UpdateScheduler {
    // Stops the loop when `shutdown` was never called.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    hub: Arc<TrackerHub>,
    period: Duration,
    state: watch::Sender<PositionState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut busy_until = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Polling loop cancelled");
                return;
            }
            deadline = ticker.tick() => {
                // The tick came due while the previous fetch was still out.
                if deadline < busy_until {
                    debug!("Skipping tick that overlapped a running fetch");
                    continue;
                }
                refresh(&hub, &state).await;
                busy_until = Instant::now();
            }
        }
    }
}

async fn refresh(hub: &TrackerHub, state: &watch::Sender<PositionState>) {
    let result = hub.fetch_latest_position().await;

    state.send_modify(|current| {
        current.ready = true;
        current.last_attempt = Some(Utc::now());

        match result {
            Ok(report) => {
                debug!("Position updated to {}, {}", report.latitude, report.longitude);
                current.snapshot = Some(report);
                current.last_update_success = true;
                current.consecutive_failures = 0;
                current.last_error = None;
            }
            Err(e) => {
                current.consecutive_failures = current.consecutive_failures.saturating_add(1);
                warn!(
                    "Position update failed ({} in a row): {}",
                    current.consecutive_failures, e
                );
                current.last_update_success = false;
                current.last_error = Some(e.to_string());
            }
        }
    });
}
