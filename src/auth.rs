//! Authentication Module
//!
//! Drives the account login through an optional SMS second factor and
//! holds the resulting session state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{AccountApi, ApiError, LoginState, SecondFactorChannel};

/// Opaque account session exported by the account service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredentials(serde_json::Map<String, serde_json::Value>);

impl SessionCredentials {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> serde_json::Map<String, serde_json::Value> {
        self.0
    }
}

/// Result of a login step, consumed by whoever drives the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    SecondFactorRequired,
    InvalidCredentials,
    InvalidSecondFactor,
}

/// Second factor method selectable in the current attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondFactorMethod {
    pub index: usize,
    pub label: String,
}

/// Where the login flow currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingSecondFactor {
        methods: Vec<SecondFactorChannel>,
        requested: Option<usize>,
    },
    Authenticated,
    Failed,
}

impl AuthState {
    fn name(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::AwaitingSecondFactor { .. } => "awaiting second factor",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        }
    }
}

/// Login state machine over an account API
pub struct AuthFlow {
    api: Arc<dyn AccountApi>,
    state: AuthState,
}

impl AuthFlow {
    pub fn new(api: Arc<dyn AccountApi>) -> Self {
        Self {
            api,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Start a fresh login attempt; allowed from any state
    pub async fn begin(&mut self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        debug!("Starting login for {}", email);
        self.state = AuthState::Failed;

        let remote = self.api.login(email, password).await.map_err(|e| match e {
            ApiError::Network(msg) => AuthError::Connectivity(msg),
            other => AuthError::Rejected(other.to_string()),
        })?;

        let outcome = match remote {
            state if state.is_logged_in() => {
                self.state = AuthState::Authenticated;
                LoginOutcome::Authenticated
            }
            LoginState::RequireSecondFactor => {
                self.state = AuthState::AwaitingSecondFactor {
                    methods: Vec::new(),
                    requested: None,
                };
                LoginOutcome::SecondFactorRequired
            }
            _ => LoginOutcome::InvalidCredentials,
        };

        info!("Login outcome: {:?}", outcome);
        Ok(outcome)
    }

    /// List the SMS channels offered for this attempt
    pub async fn list_second_factor_methods(&mut self) -> Result<Vec<SecondFactorMethod>, AuthError> {
        if !matches!(self.state, AuthState::AwaitingSecondFactor { .. }) {
            return Err(self.invalid_state("list second factor methods"));
        }

        let offered = self.api.second_factor_methods().await.map_err(AuthError::from)?;
        let offered_count = offered.len();

        // Only SMS delivery is supported.
        let (methods, listed): (Vec<_>, Vec<_>) = offered
            .into_iter()
            .filter_map(|channel| {
                let label = match &channel {
                    SecondFactorChannel::Sms { phone_number, .. } => format!("SMS {}", phone_number),
                    _ => return None,
                };
                Some((channel, label))
            })
            .enumerate()
            .map(|(index, (channel, label))| (channel, SecondFactorMethod { index, label }))
            .unzip();

        debug!("{} of {} offered second factor channels usable", methods.len(), offered_count);

        self.state = AuthState::AwaitingSecondFactor {
            methods,
            requested: None,
        };
        Ok(listed)
    }

    /// Have a code delivered over the method at `index`
    pub async fn request_second_factor(&mut self, index: usize) -> Result<(), AuthError> {
        let channel = self.method(index, "request second factor")?.clone();

        self.api
            .request_second_factor(&channel)
            .await
            .map_err(AuthError::from)?;

        if let AuthState::AwaitingSecondFactor { requested, .. } = &mut self.state {
            *requested = Some(index);
        }
        info!("Second factor requested via method {}", index);
        Ok(())
    }

    /// Submit the code delivered for the requested method at `index`
    pub async fn submit_second_factor(
        &mut self,
        index: usize,
        code: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let channel = self.method(index, "submit second factor")?.clone();

        match &self.state {
            AuthState::AwaitingSecondFactor { requested: Some(requested), .. } if *requested == index => {}
            AuthState::AwaitingSecondFactor { requested: Some(requested), .. } => {
                return Err(AuthError::Protocol(format!(
                    "code submitted for method {} but method {} was requested",
                    index, requested
                )));
            }
            _ => return Err(self.invalid_state("submit second factor")),
        }

        let result = self.api.submit_second_factor(&channel, code).await;

        // A code is tied to one request; whatever happens, this attempt is spent.
        self.state = AuthState::Unauthenticated;

        match result {
            Ok(state) if state.is_logged_in() => {
                self.state = AuthState::Authenticated;
                info!("Second factor accepted");
                Ok(LoginOutcome::Authenticated)
            }
            Ok(state) => {
                warn!("Second factor rejected, remote state {:?}", state);
                Ok(LoginOutcome::InvalidSecondFactor)
            }
            Err(ApiError::Network(msg)) => Err(AuthError::Connectivity(msg)),
            Err(e) => {
                warn!("Second factor rejected: {}", e);
                Ok(LoginOutcome::InvalidSecondFactor)
            }
        }
    }

    /// Session credentials for persistence
    pub fn export_credentials(&self) -> Result<SessionCredentials, AuthError> {
        if !self.is_authenticated() {
            return Err(self.invalid_state("export credentials"));
        }

        self.api.export_session().map_err(AuthError::from)
    }

    /// Attach previously exported credentials without logging in again
    pub fn restore_credentials(&mut self, credentials: SessionCredentials) -> Result<(), AuthError> {
        self.api
            .restore_session(credentials)
            .map_err(AuthError::from)?;

        self.state = AuthState::Authenticated;
        info!("Account session restored");
        Ok(())
    }

    fn method(&self, index: usize, operation: &'static str) -> Result<&SecondFactorChannel, AuthError> {
        match &self.state {
            AuthState::AwaitingSecondFactor { methods, .. } => {
                methods.get(index).ok_or(AuthError::UnknownMethod(index))
            }
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> AuthError {
        AuthError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Cannot reach account service: {0}")]
    Connectivity(String),

    #[error("Login rejected: {0}")]
    Rejected(String),

    #[error("Second factor sequence violated: {0}")]
    Protocol(String),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("No second factor method with index {0}")]
    UnknownMethod(usize),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(msg) => AuthError::Connectivity(msg),
            ApiError::InvalidCredentials(msg) | ApiError::Unauthorized(msg) => {
                AuthError::Rejected(msg)
            }
            other => AuthError::Protocol(other.to_string()),
        }
    }
}
