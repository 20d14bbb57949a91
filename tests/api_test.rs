/*!
 * HTTP API Tests
 *
 * Drive the full router (sessions, CORS, tracing layers included) with
 * `tower::ServiceExt::oneshot`, carrying the session cookie between requests.
 */

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::*;
use personal_finance::realtime::{ChangeKind, TABLE_TRANSACTIONS};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, set_cookie, value)
}

async fn signed_in(app: &Router, username: &str) -> String {
    let credentials = json!({ "username": username, "password": "hunter22" });
    let (status, _, _) = send(app, "POST", "/auth/register", None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, cookie, body) = send(app, "POST", "/auth/login", None, Some(credentials)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], username);
    cookie.expect("login should set a session cookie")
}

#[tokio::test]
async fn root_and_health_are_public() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;

    let (status, _, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "personal-finance-server");
}

#[tokio::test]
async fn data_routes_require_a_session() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;

    for uri in ["/transactions", "/categories", "/budgets", "/balances", "/planned", "/summary/dashboard", "/auth/me"] {
        let (status, _, _) = send(&app, "GET", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn registration_rules() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;

    let (status, _, _) = send(&app, "POST", "/auth/register", None, Some(json!({"username": "ab", "password": "hunter22"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = send(&app, "POST", "/auth/register", None, Some(json!({"username": "alice", "password": "123"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    signed_in(&app, "alice").await;
    let (status, _, _) = send(&app, "POST", "/auth/register", None, Some(json!({"username": "alice", "password": "hunter22"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = send(&app, "POST", "/auth/login", None, Some(json!({"username": "alice", "password": "wrong-password"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn transaction_crud_publishes_changes() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, state) = build_test_app(&data_path).await;
    let cookie = signed_in(&app, "alice").await;

    let (_, _, me) = send(&app, "GET", "/auth/me", Some(&cookie), None).await;
    let user_id = me["id"].as_str().unwrap().to_string();
    let mut subscription = state.feed.subscribe(&user_id, &[TABLE_TRANSACTIONS.to_string()]);

    let (status, _, created) = send(
        &app,
        "POST",
        "/transactions",
        Some(&cookie),
        Some(json!({"type": "expense", "amount": 42.5, "category": "Food", "date": "2024-03-02"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let event = subscription.next().await.unwrap();
    assert_eq!(event.event, ChangeKind::Insert);
    assert_eq!(event.record_id(), Some(id.as_str()));

    let (status, _, updated) = send(&app, "PATCH", &format!("/transactions/{}", id), Some(&cookie), Some(json!({"amount": 50.0}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["amount"], 50.0);
    assert_eq!(subscription.next().await.unwrap().event, ChangeKind::Update);

    let (status, _, listing) = send(&app, "GET", "/transactions?month=2024-03", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total_count"], 1);

    let (status, _, _) = send(&app, "DELETE", &format!("/transactions/{}", id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let event = subscription.next().await.unwrap();
    assert_eq!(event.event, ChangeKind::Delete);
    assert_eq!(event.record_id(), Some(id.as_str()));
}

#[tokio::test]
async fn users_see_only_their_own_data() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;
    let alice = signed_in(&app, "alice").await;
    let bob = signed_in(&app, "bobby").await;

    let (_, _, created) = send(&app, "POST", "/budgets", Some(&alice), Some(json!({"category": "Food", "amount": 300.0, "month": "2024-03"}))).await;
    let id = created["id"].as_str().unwrap();

    let (_, _, bobs) = send(&app, "GET", "/budgets", Some(&bob), None).await;
    assert_eq!(bobs, json!([]));
    let (status, _, _) = send(&app, "DELETE", &format!("/budgets/{}", id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn summaries_reflect_stored_data() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;
    let cookie = signed_in(&app, "alice").await;

    for body in [
        json!({"type": "income", "amount": 1000.0, "category": "Salary", "date": "2024-03-01"}),
        json!({"type": "expense", "amount": 150.0, "category": "Food", "date": "2024-03-04"}),
        json!({"type": "expense", "amount": 50.0, "category": "Fun", "date": "2024-03-05"}),
    ] {
        let (status, _, _) = send(&app, "POST", "/transactions", Some(&cookie), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    send(&app, "POST", "/budgets", Some(&cookie), Some(json!({"category": "Food", "amount": 100.0, "month": "2024-03"}))).await;

    let (status, _, dashboard) = send(&app, "GET", "/summary/dashboard?month=2024-03", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dashboard["month_totals"]["balance"], 800.0);
    assert_eq!(dashboard["expenses_by_category"][0]["name"], "Food");

    let (_, _, comparison) = send(&app, "GET", "/budgets/comparison?month=2024-03", Some(&cookie), None).await;
    assert_eq!(comparison[0]["spent"], 150.0);
    assert_eq!(comparison[0]["remaining"], -50.0);
    assert_eq!(comparison[0]["percentage"], 100.0);

    let (_, _, planning) = send(&app, "GET", "/planning/summary?month=2024-03", Some(&cookie), None).await;
    assert_eq!(planning["total_budget"], 100.0);
    assert_eq!(planning["real_expenses"], 200.0);
    assert_eq!(planning["budget_usage_percentage"], 100.0);
    assert_eq!(planning["budget_usage_raw"], 200.0);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;
    let cookie = signed_in(&app, "alice").await;

    let (status, _, _) = send(&app, "POST", "/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, "GET", "/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn realtime_checks_session_and_tables_before_upgrading() {
    let (data_path, _, _dir) = setup_test_environment().await;
    let (app, _) = build_test_app(&data_path).await;

    let (status, _, _) = send(&app, "GET", "/realtime", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = signed_in(&app, "alice").await;
    let (status, _, body) = send(&app, "GET", "/realtime?tables=users", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Unknown table: users");

    // Valid request without upgrade headers
    let (status, _, _) = send(&app, "GET", "/realtime?tables=transactions,budgets", Some(&cookie), None).await;
    assert!(status.is_client_error(), "{}", status);
}
