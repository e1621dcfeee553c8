use crate::server::TokenTable;

use cam_relay_core::RelayError;

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderValue, header};

fn table() -> TokenTable {
    let mut tokens = BTreeMap::new();
    tokens.insert("dashboard".to_string(), "s3cret-dashboard".to_string());
    tokens.insert("motion".to_string(), "s3cret-motion".to_string());
    TokenTable::new(&tokens)
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
        headers.insert(header::AUTHORIZATION, value);
    }
    headers
}

/// WHAT: A bearer header resolves to its principal
/// WHY: Rate limits are kept per principal, not per token string
#[test]
#[allow(clippy::unwrap_used)]
fn given_bearer_header_when_authenticating_then_principal_returned() {
    // Given
    let table = table();

    // When
    let principal = table.authenticate(&bearer("s3cret-motion"), None).unwrap();

    // Then
    assert_eq!(principal, "motion");
}

/// WHAT: The query token is accepted when no header is present
/// WHY: Image tags cannot send an Authorization header
#[test]
#[allow(clippy::unwrap_used)]
fn given_query_token_when_authenticating_then_principal_returned() {
    // Given
    let table = table();

    // When
    let principal = table
        .authenticate(&HeaderMap::new(), Some("s3cret-dashboard"))
        .unwrap();

    // Then
    assert_eq!(principal, "dashboard");
}

/// WHAT: Unknown, empty, prefix and missing tokens are rejected
/// WHY: Only exact configured tokens may open the proxy
#[test]
fn given_bad_credentials_when_authenticating_then_unauthorized() {
    // Given
    let table = table();

    // When
    let results = [
        table.authenticate(&bearer("wrong"), None),
        table.authenticate(&bearer("s3cret-motio"), None),
        table.authenticate(&HeaderMap::new(), Some("")),
        table.authenticate(&HeaderMap::new(), None),
    ];

    // Then
    for result in results {
        assert!(matches!(result, Err(RelayError::Unauthorized { .. })));
    }
}

/// WHAT: An empty table accepts nothing
/// WHY: A missing tokens section must fail closed
#[test]
fn given_empty_table_when_looking_up_then_no_principal() {
    // Given
    let table = TokenTable::new(&BTreeMap::new());

    // When/Then
    assert!(table.principal_for("").is_none());
    assert!(table.principal_for("anything").is_none());
}
