//! FindMy Tracker Library
//!
//! Logs into the account service, then keeps polling for the latest
//! position of one tracked accessory.

pub mod accessory;
pub mod api;
pub mod auth;
pub mod config;
pub mod hub;
pub mod logging;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use accessory::{Accessory, ImportError};
pub use api::{AccountApi, ApiError, HttpAccountApi, LoginState, SecondFactorChannel};
pub use auth::{AuthError, AuthFlow, AuthState, LoginOutcome, SecondFactorMethod, SessionCredentials};
pub use hub::{HubError, TrackerHub};
pub use report::LocationReport;
pub use scheduler::{PositionState, UpdateScheduler};
pub use tracker::DeviceTracker;
