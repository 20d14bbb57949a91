//! Realtime change feed
//!
//! Every successful mutation publishes a [`ChangeEvent`] on a tokio broadcast
//! channel. WebSocket clients at `GET /realtime` receive the events that belong
//! to their own user, optionally narrowed to a set of tables.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::get_current_user;

pub const TABLE_TRANSACTIONS: &str = "transactions";
pub const TABLE_CATEGORIES: &str = "categories";
pub const TABLE_BUDGETS: &str = "budgets";
pub const TABLE_BALANCE_CATEGORIES: &str = "balance_categories";
pub const TABLE_BALANCES: &str = "balances";
pub const TABLE_PLANNED: &str = "planned_transactions";

pub const ALL_TABLES: [&str; 6] = [
    TABLE_TRANSACTIONS,
    TABLE_CATEGORIES,
    TABLE_BUDGETS,
    TABLE_BALANCE_CATEGORIES,
    TABLE_BALANCES,
    TABLE_PLANNED,
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub event: ChangeKind,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: &str, user_id: &str, record: &T) -> Self {
        Self {
            table: table.to_string(),
            event: ChangeKind::Insert,
            user_id: user_id.to_string(),
            new: serde_json::to_value(record).ok(),
            old: None,
        }
    }

    pub fn update<T: Serialize>(table: &str, user_id: &str, old: &T, new: &T) -> Self {
        Self {
            table: table.to_string(),
            event: ChangeKind::Update,
            user_id: user_id.to_string(),
            new: serde_json::to_value(new).ok(),
            old: serde_json::to_value(old).ok(),
        }
    }

    pub fn delete<T: Serialize>(table: &str, user_id: &str, old: &T) -> Self {
        Self {
            table: table.to_string(),
            event: ChangeKind::Delete,
            user_id: user_id.to_string(),
            new: None,
            old: serde_json::to_value(old).ok(),
        }
    }

    /// Id of the affected record, taken from `new` or, for deletes, `old`.
    pub fn record_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .and_then(|v| v.get("id"))
            .and_then(|id| id.as_str())
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing with no listeners is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::trace!(receivers, "change event published");
    }

    pub fn subscribe(&self, user_id: &str, tables: &[String]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            user_id: user_id.to_string(),
            tables: tables.iter().cloned().collect(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    user_id: String,
    tables: HashSet<String>,
}

impl Subscription {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.user_id == self.user_id
            && (self.tables.is_empty() || self.tables.contains(&event.table))
    }

    /// Next event for this subscriber; `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.user_id, skipped, "realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct RealtimeQuery {
    pub tables: Option<String>,
}

pub fn parse_tables(raw: Option<&str>) -> Result<Vec<String>, (StatusCode, String)> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut tables = Vec::new();
    for table in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !ALL_TABLES.contains(&table) {
            return Err((StatusCode::BAD_REQUEST, format!("Unknown table: {}", table)));
        }
        tables.push(table.to_string());
    }
    Ok(tables)
}

/// Session and table checks run before the upgrade is required, so a plain
/// request gets 401/400 rather than an upgrade error.
pub async fn realtime_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<RealtimeQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, (StatusCode, String)> {
    let user = get_current_user(&session).await?;
    let tables = parse_tables(query.tables.as_deref())?;
    let ws = ws.map_err(|rejection| (rejection.status(), rejection.body_text()))?;
    let subscription = state.feed.subscribe(&user.id, &tables);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let user_id = subscription.user_id.clone();
    tracing::info!(user_id = %user_id, "realtime client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize change event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; drain incoming frames until close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(user_id = %user_id, "realtime client disconnected");
}
