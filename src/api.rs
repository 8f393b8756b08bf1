//! Account API Module
//!
//! The remote account/report service seen by the tracker, and its HTTP
//! implementation talking JSON to the anisette gateway.

use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accessory::{Accessory, AccessoryKeys};
use crate::auth::SessionCredentials;
use crate::report::LocationReport;

/// Login state reported by the account service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    LoggedOut,
    #[serde(rename = "require_2fa")]
    RequireSecondFactor,
    Authenticated,
    LoggedIn,
}

impl LoginState {
    /// Both terminal success states of the account service
    pub fn is_logged_in(&self) -> bool {
        matches!(self, LoginState::Authenticated | LoginState::LoggedIn)
    }
}

/// Delivery channel offered for a second factor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecondFactorChannel {
    Sms { id: u64, phone_number: String },
    TrustedDevice,
    #[serde(other)]
    Unsupported,
}

/// Remote account and report service
#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Primary login with email and password
    async fn login(&self, email: &str, password: &str) -> Result<LoginState, ApiError>;

    /// Channels offered for the pending second factor
    async fn second_factor_methods(&self) -> Result<Vec<SecondFactorChannel>, ApiError>;

    /// Ask the service to deliver a code over `channel`
    async fn request_second_factor(&self, channel: &SecondFactorChannel) -> Result<(), ApiError>;

    /// Submit the delivered code for `channel`
    async fn submit_second_factor(
        &self,
        channel: &SecondFactorChannel,
        code: &str,
    ) -> Result<LoginState, ApiError>;

    /// Snapshot of the current session for persistence
    fn export_session(&self) -> Result<SessionCredentials, ApiError>;

    /// Adopt a previously exported session without a network call
    fn restore_session(&self, credentials: SessionCredentials) -> Result<(), ApiError>;

    /// Decrypted report history of `accessory`
    async fn fetch_reports(&self, accessory: &Accessory) -> Result<Vec<LocationReport>, ApiError>;
}

/// HTTP client for the anisette/report gateway
pub struct HttpAccountApi {
    base_url: String,
    client: reqwest::Client,
    client_name: String,
    session: RwLock<Option<SessionCredentials>>,
}

impl HttpAccountApi {
    /// Create a new gateway client
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let client_name = whoami::fallible::hostname()
            .unwrap_or_else(|_| "FindMy Tracker".to_string());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            client_name,
            session: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session(&self) -> Result<SessionCredentials, ApiError> {
        self.session
            .read()
            .map_err(|_| ApiError::NoSession)?
            .clone()
            .ok_or(ApiError::NoSession)
    }

    fn store_session(&self, account: Option<SessionCredentials>) {
        let Some(account) = account else {
            return;
        };
        match self.session.write() {
            Ok(mut guard) => *guard = Some(account),
            Err(_) => warn!("Session lock poisoned, dropping account update"),
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        let bytes = read_body(response).await?;

        serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn send<B>(&self, path: &str, body: &B) -> Result<reqwest::Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);

        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("X-Client-Name", &self.client_name)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let bytes = read_body(response).await?;
        let message = serde_json::from_slice::<ErrorResponse>(&bytes)
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("Status: {}", status));

        Err(match status.as_u16() {
            401 => ApiError::Unauthorized(message),
            403 => ApiError::InvalidCredentials(message),
            409 => ApiError::Protocol(message),
            // Gateway is up but its upstream is not.
            502..=504 => ApiError::Network(message),
            _ => ApiError::Server(message),
        })
    }
}

/// Read the whole body; a connection lost mid-body is a transport failure
async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, ApiError> {
    response
        .bytes()
        .await
        .map(|body| body.to_vec())
        .map_err(|e| ApiError::Network(e.to_string()))
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginState, ApiError> {
        let response: LoginResponse = self
            .post("/api/account/login", &LoginRequest { email, password })
            .await?;

        info!("Login answered with state {:?}", response.state);
        self.store_session(response.account);
        Ok(response.state)
    }

    async fn second_factor_methods(&self) -> Result<Vec<SecondFactorChannel>, ApiError> {
        let account = self.session()?;
        self.post("/api/account/2fa/methods", &AccountRequest { account: &account })
            .await
    }

    async fn request_second_factor(&self, channel: &SecondFactorChannel) -> Result<(), ApiError> {
        let account = self.session()?;
        self.send(
            "/api/account/2fa/request",
            &MethodRequest { account: &account, method: channel, code: None },
        )
        .await?;

        info!("Second factor code requested");
        Ok(())
    }

    async fn submit_second_factor(
        &self,
        channel: &SecondFactorChannel,
        code: &str,
    ) -> Result<LoginState, ApiError> {
        let account = self.session()?;
        let response: LoginResponse = self
            .post(
                "/api/account/2fa/submit",
                &MethodRequest { account: &account, method: channel, code: Some(code) },
            )
            .await?;

        self.store_session(response.account);
        Ok(response.state)
    }

    fn export_session(&self) -> Result<SessionCredentials, ApiError> {
        self.session()
    }

    fn restore_session(&self, credentials: SessionCredentials) -> Result<(), ApiError> {
        self.store_session(Some(credentials));
        Ok(())
    }

    async fn fetch_reports(&self, accessory: &Accessory) -> Result<Vec<LocationReport>, ApiError> {
        let account = self.session()?;
        let reports: Vec<LocationReport> = self
            .post(
                "/api/reports/latest",
                &ReportsRequest { account: &account, accessory: accessory.keys() },
            )
            .await?;

        debug!("Fetched {} reports for {}", reports.len(), accessory.identifier());
        Ok(reports)
    }
}

// Request/Response types

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct AccountRequest<'a> {
    account: &'a SessionCredentials,
}

#[derive(Serialize)]
struct MethodRequest<'a> {
    account: &'a SessionCredentials,
    method: &'a SecondFactorChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

#[derive(Serialize)]
struct ReportsRequest<'a> {
    account: &'a SessionCredentials,
    accessory: AccessoryKeys,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    state: LoginState,
    #[serde(default)]
    account: Option<SessionCredentials>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// API errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No account session")]
    NoSession,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_states_use_gateway_names() {
        let state: LoginState = serde_json::from_str("\"require_2fa\"").unwrap();
        assert_eq!(state, LoginState::RequireSecondFactor);

        assert!(LoginState::LoggedIn.is_logged_in());
        assert!(LoginState::Authenticated.is_logged_in());
        assert!(!LoginState::LoggedOut.is_logged_in());
    }

    #[test]
    fn unknown_channel_kinds_are_unsupported() {
        let channels: Vec<SecondFactorChannel> = serde_json::from_str(
            r#"[
                {"type": "sms", "id": 1, "phone_number": "+1555•••12"},
                {"type": "trusted_device"},
                {"type": "carrier_pigeon"}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            channels,
            vec![
                SecondFactorChannel::Sms { id: 1, phone_number: "+1555•••12".into() },
                SecondFactorChannel::TrustedDevice,
                SecondFactorChannel::Unsupported,
            ]
        );
    }

    #[test]
    fn session_is_required_before_account_calls() {
        let api = HttpAccountApi::new("http://localhost:6969/").unwrap();

        assert_eq!(api.base_url(), "http://localhost:6969");
        assert_eq!(api.export_session(), Err(ApiError::NoSession));
    }

    #[test]
    fn restored_session_is_exported_back() {
        let api = HttpAccountApi::new("http://localhost:6969").unwrap();
        let credentials: SessionCredentials =
            serde_json::from_str(r#"{"dsid": "123", "token": "abc"}"#).unwrap();

        api.restore_session(credentials.clone()).unwrap();

        assert_eq!(api.export_session(), Ok(credentials));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_network_error() {
        let api = HttpAccountApi::new("http://127.0.0.1:9").unwrap();

        let err = api.login("a@b.com", "pw").await.unwrap_err();

        assert!(matches!(err, ApiError::Network(_)));
    }
}
