//! Tracker Hub
//!
//! Binds one accessory to an authenticated account session and fetches
//! its latest position.

use std::sync::Arc;

use tracing::{debug, info};

use crate::accessory::{Accessory, ImportError};
use crate::api::{AccountApi, ApiError, HttpAccountApi};
use crate::auth::{AuthError, AuthFlow, AuthState, LoginOutcome, SecondFactorMethod, SessionCredentials};
use crate::report::{latest_report, LocationReport};

/// Hub owning the account session and the tracked accessory
pub struct TrackerHub {
    api: Arc<dyn AccountApi>,
    auth: AuthFlow,
    accessory: Option<Accessory>,
}

impl TrackerHub {
    /// Create a hub talking to the gateway at `url`
    pub fn new(url: &str) -> Result<Self, HubError> {
        let api = HttpAccountApi::new(url).map_err(HubError::from)?;
        Ok(Self::with_api(Arc::new(api)))
    }

    /// Create a hub over any account API implementation
    pub fn with_api(api: Arc<dyn AccountApi>) -> Self {
        Self {
            auth: AuthFlow::new(api.clone()),
            api,
            accessory: None,
        }
    }

    pub fn auth_state(&self) -> &AuthState {
        self.auth.state()
    }

    pub fn accessory(&self) -> Option<&Accessory> {
        self.accessory.as_ref()
    }

    pub async fn begin(&mut self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        self.auth.begin(email, password).await
    }

    pub async fn list_second_factor_methods(&mut self) -> Result<Vec<SecondFactorMethod>, AuthError> {
        self.auth.list_second_factor_methods().await
    }

    pub async fn request_second_factor(&mut self, index: usize) -> Result<(), AuthError> {
        self.auth.request_second_factor(index).await
    }

    pub async fn submit_second_factor(
        &mut self,
        index: usize,
        code: &str,
    ) -> Result<LoginOutcome, AuthError> {
        self.auth.submit_second_factor(index, code).await
    }

    pub fn export_credentials(&self) -> Result<SessionCredentials, AuthError> {
        self.auth.export_credentials()
    }

    pub fn restore_credentials(&mut self, credentials: SessionCredentials) -> Result<(), AuthError> {
        self.auth.restore_credentials(credentials)
    }

    /// Parse and keep the accessory to track; a hub tracks one accessory for life
    pub fn load_accessory(&mut self, blob: &str) -> Result<&Accessory, HubError> {
        if let Some(loaded) = &self.accessory {
            return Err(HubError::AccessoryLoaded(loaded.identifier().to_string()));
        }

        let accessory = Accessory::from_export(blob)?;
        info!("Tracking accessory {} ({})", accessory.name(), accessory.identifier());
        Ok(&*self.accessory.insert(accessory))
    }

    /// Fetch the report history and return its newest entry
    pub async fn fetch_latest_position(&self) -> Result<LocationReport, HubError> {
        let accessory = self.accessory.as_ref().ok_or(HubError::NoAccessory)?;

        if !self.auth.is_authenticated() {
            return Err(HubError::NotAuthenticated);
        }

        let reports = self.api.fetch_reports(accessory).await?;
        let count = reports.len();

        let latest = latest_report(reports).ok_or(HubError::EmptyHistory)?;

        debug!(
            "Latest of {} reports for {} taken at {}",
            count,
            accessory.identifier(),
            latest.timestamp
        );
        Ok(latest)
    }
}

/// Hub errors
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Accessory not loaded")]
    NoAccessory,

    #[error("Accessory {0} already loaded")]
    AccessoryLoaded(String),

    #[error("Account session not authenticated")]
    NotAuthenticated,

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Session rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Accessory has no location reports")]
    EmptyHistory,

    #[error(transparent)]
    Import(#[from] ImportError),
}

impl From<ApiError> for HubError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => HubError::Connectivity(msg),
            ApiError::InvalidCredentials(msg) | ApiError::Unauthorized(msg) => HubError::Rejected(msg),
            ApiError::NoSession => HubError::NotAuthenticated,
            other => HubError::Protocol(other.to_string()),
        }
    }
}
