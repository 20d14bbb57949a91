/*!
 * Realtime WebSocket Tests
 *
 * Connect a WebSocket client to `/realtime` on a live server and check that
 * mutations made over HTTP arrive as JSON change events.
 */

mod common;

use common::*;
use futures_util::StreamExt;
use personal_finance::realtime::{ChangeKind, TABLE_TRANSACTIONS};
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};

async fn session_cookie(base_url: &str, username: &str) -> String {
    let http = reqwest::Client::new();
    let credentials = json!({ "username": username, "password": "hunter22" });
    let response = http
        .post(format!("{}/auth/register", base_url))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let response = http
        .post(format!("{}/auth/login", base_url))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    header.split(';').next().unwrap().to_string()
}

fn ws_request(base_url: &str, query: &str, cookie: Option<&str>) -> tungstenite::handshake::client::Request {
    let url = format!("{}/realtime{}", base_url.replacen("http://", "ws://", 1), query);
    let mut request = url.into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    }
    request
}

fn rejected_status(result: Result<impl Sized, tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn socket_receives_own_changes() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (base_url, _) = spawn_test_server(&data_path).await;
    let cookie = session_cookie(&base_url, "alice").await;

    let (mut socket, _) = connect_async(ws_request(&base_url, "?tables=transactions", Some(&cookie)))
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/transactions", base_url))
        .header(COOKIE, &cookie)
        .json(&json!({"type": "expense", "amount": 12.5, "category": "Food", "date": "2024-03-02"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no change event within 5s")
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(event["table"], TABLE_TRANSACTIONS);
    assert_eq!(event["event"], serde_json::to_value(ChangeKind::Insert).unwrap());
    assert_eq!(event["new"]["id"], created["id"]);
    assert_eq!(event["new"]["amount"], 12.5);
}

#[tokio::test]
async fn socket_ignores_other_tables_and_users() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (base_url, _) = spawn_test_server(&data_path).await;
    let alice = session_cookie(&base_url, "alice").await;
    let bob = session_cookie(&base_url, "bobby").await;

    let (mut socket, _) = connect_async(ws_request(&base_url, "?tables=budgets", Some(&alice)))
        .await
        .unwrap();

    let http = reqwest::Client::new();
    for (cookie, path, body) in [
        (&alice, "/transactions", json!({"type": "income", "amount": 5.0, "category": "Gift", "date": "2024-03-02"})),
        (&bob, "/budgets", json!({"category": "Food", "amount": 50.0, "month": "2024-03"})),
        (&alice, "/budgets", json!({"category": "Rent", "amount": 700.0, "month": "2024-03"})),
    ] {
        let response = http
            .post(format!("{}{}", base_url, path))
            .header(COOKIE, cookie.as_str())
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    }

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no change event within 5s")
        .unwrap()
        .unwrap();
    let event: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(event["table"], "budgets");
    assert_eq!(event["new"]["category"], "Rent");
}

#[tokio::test]
async fn handshake_requires_session_and_known_tables() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (base_url, _) = spawn_test_server(&data_path).await;

    let status = rejected_status(connect_async(ws_request(&base_url, "", None)).await);
    assert_eq!(status, 401);

    let cookie = session_cookie(&base_url, "alice").await;
    let status = rejected_status(connect_async(ws_request(&base_url, "?tables=users", Some(&cookie))).await);
    assert_eq!(status, 400);
}
