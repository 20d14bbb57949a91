#![allow(dead_code)]

use axum::Router;
use personal_finance::app::{AppState, build_router};
use personal_finance::config::Config;
use personal_finance::database::{Db, get_user_db, init_main_db};
use personal_finance::models::{CreateTransactionPayload, Transaction, TransactionType};
use personal_finance::transactions::insert_transaction;
use std::fs;
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

pub const TEST_SESSION_SECRET: &str =
    "test-session-secret-that-is-definitely-long-enough-for-signing-cookies-0123456789";

/// Fresh data directory with an initialized main DB and one user DB.
/// The returned `TempDir` must be kept alive for the duration of the test.
pub async fn setup_test_environment() -> (String, String, TempDir) {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let data_path = temp_dir
        .path()
        .to_str()
        .expect("Failed to convert path to string")
        .to_string();
    let user_id = Uuid::new_v4().to_string();

    fs::create_dir_all(&data_path).expect("Failed to create data directory");

    init_main_db(&data_path)
        .await
        .unwrap_or_else(|e| panic!("Failed to initialize main database at {}: {}", data_path, e));

    get_user_db(&data_path, &user_id).await.unwrap_or_else(|e| {
        panic!(
            "Failed to initialize user database for user {} at {}: {}",
            user_id, data_path, e
        )
    });

    (data_path, user_id, temp_dir)
}

pub async fn open_user_db(data_path: &str, user_id: &str) -> Db {
    get_user_db(data_path, user_id)
        .await
        .unwrap_or_else(|e| panic!("Failed to get user database for {}: {}", user_id, e))
}

pub fn transaction_payload(
    kind: TransactionType,
    amount: f64,
    category: &str,
    date: &str,
) -> CreateTransactionPayload {
    CreateTransactionPayload {
        kind,
        amount,
        category: category.to_string(),
        description: String::new(),
        date: date.to_string(),
    }
}

pub async fn create_test_transaction(
    db: &Db,
    user_id: &str,
    kind: TransactionType,
    amount: f64,
    category: &str,
    date: &str,
) -> Transaction {
    insert_transaction(db, user_id, &transaction_payload(kind, amount, category, date))
        .await
        .unwrap_or_else(|(status, msg)| {
            panic!(
                "Failed to insert test transaction '{}' for user {}: {} {}",
                category, user_id, status, msg
            )
        })
}

pub fn test_config(data_path: &str) -> Config {
    Config::from_lookup(|key| match key {
        "DATABASE_PATH" => Some(data_path.to_string()),
        "SESSION_SECRET" => Some(TEST_SESSION_SECRET.to_string()),
        // Nothing listens here; price tests run their own server
        "PRICE_URL" => Some("http://127.0.0.1:9/price".to_string()),
        _ => None,
    })
    .expect("Failed to build test config")
}

pub async fn build_test_app(data_path: &str) -> (Router, AppState) {
    let config = test_config(data_path);
    let main_db = init_main_db(data_path)
        .await
        .expect("Failed to initialize main database");
    let state = AppState::new(main_db, &config);
    let router = build_router(state.clone(), &config).expect("Failed to build router");
    (router, state)
}

/// Serves the app on an ephemeral port and returns its base URL.
pub async fn spawn_test_server(data_path: &str) -> (String, AppState) {
    let (router, state) = build_test_app(data_path).await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });
    (format!("http://{}", addr), state)
}
