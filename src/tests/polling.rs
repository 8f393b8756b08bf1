//! Hub fetch tests: preconditions, newest report selection, restored sessions.

use std::time::Duration;

use super::harness::*;
use crate::api::ApiError;
use crate::hub::{HubError, TrackerHub};

#[tokio::test]
async fn fetch_without_accessory_fails() {
    let hub = logged_in_hub(FakeAccount::new()).await;

    let err = hub.fetch_latest_position().await.unwrap_err();

    assert!(matches!(err, HubError::NoAccessory));
}

#[tokio::test]
async fn fetch_without_session_fails() {
    let mut hub = TrackerHub::with_api(FakeAccount::new());
    hub.load_accessory(&accessory_blob()).unwrap();

    let err = hub.fetch_latest_position().await.unwrap_err();

    assert!(matches!(err, HubError::NotAuthenticated));
}

#[tokio::test]
async fn malformed_accessory_is_an_import_error() {
    let mut hub = TrackerHub::with_api(FakeAccount::new());

    let err = hub.load_accessory("{\"identifier\": 5}").unwrap_err();

    assert!(matches!(err, HubError::Import(_)));
    assert!(hub.accessory().is_none());
}

#[tokio::test]
async fn loaded_accessory_cannot_be_replaced() {
    let mut hub = TrackerHub::with_api(FakeAccount::new());
    hub.load_accessory(&accessory_blob()).unwrap();

    let other = accessory_blob().replace(ACCESSORY_ID, "another-accessory");
    let err = hub.load_accessory(&other).unwrap_err();

    assert!(matches!(err, HubError::AccessoryLoaded(id) if id == ACCESSORY_ID));
    assert_eq!(hub.accessory().unwrap().identifier(), ACCESSORY_ID);
}

#[tokio::test]
async fn newest_report_is_selected() {
    let account = FakeAccount::new();
    account.set_reports(vec![report(10.0, 50), report(11.0, 4000), report(12.0, 3999)]);
    let hub = ready_hub(account).await;

    let latest = hub.fetch_latest_position().await.unwrap();

    assert_eq!(latest, report(11.0, 4000));
}

#[tokio::test]
async fn single_report_comes_back_unchanged() {
    let account = FakeAccount::new();
    account.set_reports(vec![report(47.37, 0)]);
    let hub = ready_hub(account).await;

    assert_eq!(hub.fetch_latest_position().await.unwrap(), report(47.37, 0));
}

#[tokio::test]
async fn equal_timestamps_keep_arrival_order() {
    let account = FakeAccount::new();
    account.set_reports(vec![report(1.0, 10), report(2.0, 20), report(3.0, 20)]);
    let hub = ready_hub(account).await;

    assert_eq!(hub.fetch_latest_position().await.unwrap().latitude, 2.0);
}

#[tokio::test]
async fn empty_history_is_reported_as_such() {
    let account = FakeAccount::new();
    account.set_reports(Vec::new());
    let hub = ready_hub(account).await;

    let err = hub.fetch_latest_position().await.unwrap_err();

    assert!(matches!(err, HubError::EmptyHistory));
}

#[tokio::test]
async fn transport_failure_is_a_connectivity_error() {
    let account = FakeAccount::new();
    account.push_fetch(Duration::ZERO, Err(ApiError::Network("timed out".into())));
    let hub = ready_hub(account).await;

    let err = hub.fetch_latest_position().await.unwrap_err();

    assert!(matches!(err, HubError::Connectivity(_)));
}

#[tokio::test]
async fn revoked_session_is_rejected() {
    let account = FakeAccount::new();
    account.push_fetch(Duration::ZERO, Err(ApiError::Unauthorized("revoked".into())));
    let hub = ready_hub(account).await;

    let err = hub.fetch_latest_position().await.unwrap_err();

    assert!(matches!(err, HubError::Rejected(_)));
}

#[tokio::test]
async fn restored_credentials_fetch_without_login() {
    let credentials = {
        let hub = logged_in_hub(FakeAccount::new()).await;
        hub.export_credentials().unwrap()
    };

    // Fresh service instance, as after a restart.
    let account = FakeAccount::new();
    let mut hub = TrackerHub::with_api(account.clone());
    hub.restore_credentials(credentials).unwrap();
    hub.load_accessory(&accessory_blob()).unwrap();

    let latest = hub.fetch_latest_position().await.unwrap();

    assert_eq!(latest, report(2.0, 300));
    assert_eq!(account.login_calls(), 0);
}

#[tokio::test]
async fn credentials_survive_json_persistence() {
    let hub = logged_in_hub(FakeAccount::new()).await;
    let stored = serde_json::to_string(&hub.export_credentials().unwrap()).unwrap();

    let account = FakeAccount::new();
    let mut restored = TrackerHub::with_api(account);
    restored.restore_credentials(serde_json::from_str(&stored).unwrap()).unwrap();

    assert_eq!(restored.export_credentials().unwrap(), hub.export_credentials().unwrap());
}
