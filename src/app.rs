use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode},
    routing::{get, patch, post},
};
use serde_json::{Value, json};
use time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::Key};

use crate::config::Config;
use crate::constants::*;
use crate::currency::DollarPrice;
use crate::database::{Db, UserDatabases};
use crate::realtime::ChangeFeed;
use crate::utils::ApiError;
use crate::{auth, balances, budgets, categories, currency, planned, realtime, summary, transactions};

#[derive(Clone)]
pub struct AppState {
    pub main_db: Db,
    pub user_dbs: UserDatabases,
    pub feed: ChangeFeed,
    pub price: DollarPrice,
}

impl AppState {
    pub fn new(main_db: Db, config: &Config) -> Self {
        Self {
            main_db,
            user_dbs: UserDatabases::new(config.data_path.clone()),
            feed: ChangeFeed::new(config.realtime_capacity),
            price: DollarPrice::new(config.price_url.clone()),
        }
    }

    pub async fn user_db(&self, user_id: &str) -> Result<Db, ApiError> {
        self.user_dbs.get(user_id).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "failed to open user database");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ERR_DATABASE_ACCESS.to_string(),
            )
        })
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    match config
        .cors_origin
        .as_deref()
        .and_then(|o| o.parse::<HeaderValue>().ok())
    {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    }
}

pub fn build_router(state: AppState, config: &Config) -> anyhow::Result<Router> {
    let key = Key::try_from(config.session_secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid session key: {}", e))?;
    // TODO: replace MemoryStore with a libsql-backed store so sessions survive restarts
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(config.session_secure)
        .with_name(SESSION_NAME)
        .with_expiry(Expiry::OnInactivity(Duration::days(SESSION_EXPIRY_DAYS)))
        .with_signed(key);

    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route(
            "/transactions/{id}",
            patch(transactions::update_transaction).delete(transactions::delete_transaction),
        )
        .route(
            "/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/categories/{id}",
            patch(categories::update_category).delete(categories::delete_category),
        )
        .route(
            "/budgets",
            get(budgets::list_budgets).post(budgets::create_budget),
        )
        .route("/budgets/comparison", get(summary::budget_comparison_handler))
        .route(
            "/budgets/{id}",
            patch(budgets::update_budget).delete(budgets::delete_budget),
        )
        .route(
            "/balance-categories",
            get(balances::list_balance_categories).post(balances::create_balance_category),
        )
        .route(
            "/balance-categories/{id}",
            patch(balances::rename_balance_category).delete(balances::delete_balance_category),
        )
        .route(
            "/balances",
            get(balances::list_balances).post(balances::create_balance),
        )
        .route("/balances/total", get(balances::balance_total_handler))
        .route(
            "/balances/{id}",
            patch(balances::update_balance).delete(balances::delete_balance),
        )
        .route(
            "/planned",
            get(planned::list_planned).post(planned::create_planned),
        )
        .route("/planned/monthly", get(planned::monthly_summary))
        .route(
            "/planned/{id}",
            patch(planned::update_planned).delete(planned::delete_planned),
        )
        .route("/planning/summary", get(summary::planning_summary_handler))
        .route("/summary/dashboard", get(summary::dashboard_handler))
        .route("/price/dollar", get(currency::dollar_price_handler))
        .route("/realtime", get(realtime::realtime_handler))
        .layer(session_layer)
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(router)
}

async fn root() -> Json<Value> {
    Json(json!({ "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
