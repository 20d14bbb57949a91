use anyhow::{Result, bail};
use libsql::{Builder, Connection};
use std::{collections::HashMap, path::Path, sync::Arc};
use tokio::sync::RwLock;

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             TEXT    PRIMARY KEY,
    name           TEXT    UNIQUE NOT NULL,
    password_hash  TEXT    NOT NULL,
    created_at     TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);
"#;

const CREATE_USER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    type        TEXT NOT NULL CHECK (type IN ('income', 'expense', 'both')),
    color       TEXT NOT NULL,
    icon        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_categories_user_name ON categories (user_id, name);

CREATE TABLE IF NOT EXISTS transactions (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    type         TEXT NOT NULL CHECK (type IN ('income', 'expense')),
    amount       REAL NOT NULL,
    category     TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    date         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions (user_id, date);

CREATE TABLE IF NOT EXISTS budgets (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    category    TEXT NOT NULL,
    amount      REAL NOT NULL,
    month       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_budgets_user_month ON budgets (user_id, month);

CREATE TABLE IF NOT EXISTS balance_categories (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS balances (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    category_id  TEXT NOT NULL,
    amount       REAL NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_balances_category ON balances (category_id);

CREATE TABLE IF NOT EXISTS planned_transactions (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    month        TEXT NOT NULL,
    type         TEXT NOT NULL CHECK (type IN ('income', 'expense')),
    category     TEXT NOT NULL,
    amount       REAL NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_planned_user_month ON planned_transactions (user_id, month);
"#;

pub type Db = Arc<RwLock<Connection>>;

/// Main users registry DB (users.db)
pub async fn init_main_db(data_dir: &str) -> Result<Db> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = Path::new(data_dir).join("users.db");
    let db = Builder::new_local(path).build().await?;
    let conn = db.connect()?;

    conn.execute(CREATE_USERS_TABLE, ()).await?;
    Ok(Arc::new(RwLock::new(conn)))
}

fn is_safe_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Per-user isolated DB (user_{id}.db), schema created on open
pub async fn get_user_db(data_dir: &str, user_id: &str) -> Result<Db> {
    if !is_safe_user_id(user_id) {
        bail!("invalid user id for database path: {:?}", user_id);
    }
    tokio::fs::create_dir_all(data_dir).await?;
    let path = Path::new(data_dir).join(format!("user_{}.db", user_id));
    let db = Builder::new_local(path).build().await?;
    let conn = db.connect()?;

    conn.execute_batch(CREATE_USER_SCHEMA).await?;
    Ok(Arc::new(RwLock::new(conn)))
}

/// Lazily opened per-user databases, one shared connection per user.
#[derive(Clone)]
pub struct UserDatabases {
    data_dir: Arc<str>,
    open: Arc<RwLock<HashMap<String, Db>>>,
}

impl UserDatabases {
    pub fn new(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: Arc::from(data_dir.into()),
            open: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub async fn get(&self, user_id: &str) -> Result<Db> {
        if let Some(db) = self.open.read().await.get(user_id) {
            return Ok(db.clone());
        }

        let mut open = self.open.write().await;
        // Another task may have opened it while we waited for the write lock
        if let Some(db) = open.get(user_id) {
            return Ok(db.clone());
        }

        let db = get_user_db(&self.data_dir, user_id).await?;
        tracing::debug!(user_id = %user_id, "opened user database");
        open.insert(user_id.to_string(), db.clone());
        Ok(db)
    }

    pub async fn open_count(&self) -> usize {
        self.open.read().await.len()
    }
}
