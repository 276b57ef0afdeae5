//! Common test utilities for msgraph-tap integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use msgraph_tap::{GraphClient, RetryPolicy, TapConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TENANT_ID: &str = "test-tenant";
pub const ACCESS_TOKEN: &str = "mock-access-token";

/// Config pointing both login and Graph traffic at the mock server.
pub fn test_config(server: &MockServer) -> TapConfig {
    test_config_with(server, true)
}

pub fn test_config_with(server: &MockServer, continue_on_error: bool) -> TapConfig {
    TapConfig::builder()
        .tenant_id(TENANT_ID)
        .client_id("test-client")
        .client_secret("test-secret")
        .start_date(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .base_url(server.uri())
        .continue_on_error(continue_on_error)
        .build()
        .unwrap()
}

/// Authenticated client that retries without sleeping.
pub async fn connect_client(config: &TapConfig) -> GraphClient {
    let client = GraphClient::new(config)
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(5));
    client.authenticate_session().await.unwrap();
    client
}

/// Creates a mock OAuth token response.
pub fn create_token_response(access_token: &str, expires_in: u64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in
    })
}

/// Sets up the OAuth token endpoint.
pub async fn mock_token_endpoint(server: &MockServer, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/{TENANT_ID}/oauth2/v2.0/token")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(create_token_response(ACCESS_TOKEN, expires_in)),
        )
        .mount(server)
        .await;
}

/// Wraps items in an OData response format.
pub fn create_odata_response(
    items: Vec<Value>,
    next_link: Option<&str>,
    delta_link: Option<&str>,
) -> Value {
    let mut response = json!({ "value": items });
    if let Some(link) = next_link {
        response["@odata.nextLink"] = json!(link);
    }
    if let Some(link) = delta_link {
        response["@odata.deltaLink"] = json!(link);
    }
    response
}

/// Creates an OData error response.
pub fn create_odata_error(code: &str, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "message": message
        }
    })
}

pub fn create_test_user(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "userPrincipalName": format!("{name}@test.onmicrosoft.com"),
        "displayName": format!("Test User {name}"),
        "accountEnabled": true
    })
}

pub fn create_test_group(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "displayName": name,
        "securityEnabled": true,
        "groupTypes": []
    })
}

pub fn create_drive_item(id: &str, last_modified: &str) -> Value {
    json!({
        "id": id,
        "name": format!("{id}.docx"),
        "lastModifiedDateTime": last_modified
    })
}

/// Ids of a list of records.
pub fn ids(records: &[&Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Fails with `status` for the first `failures` requests, then succeeds.
pub struct FlakyResponder {
    pub status: u16,
    pub failures: u32,
    pub body: Value,
    pub calls: Arc<AtomicU32>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ResponseTemplate::new(self.status)
                .set_body_json(create_odata_error("serviceNotAvailable", "try again"))
        } else {
            ResponseTemplate::new(200).set_body_json(self.body.clone())
        }
    }
}
