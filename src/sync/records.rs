use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::constants::*;
use crate::models::*;
use crate::realtime::{
    TABLE_BALANCE_CATEGORIES, TABLE_BALANCES, TABLE_BUDGETS, TABLE_CATEGORIES, TABLE_PLANNED,
    TABLE_TRANSACTIONS,
};
use crate::utils::now_timestamp;

/// A row type that can be mirrored by a [`super::Collection`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table name carried by realtime events.
    const TABLE: &'static str;
    /// Route serving the collection.
    const PATH: &'static str;

    type Draft: Serialize + Send + Sync;
    type Patch: Serialize + Send + Sync;

    fn id(&self) -> &str;

    /// Local stand-in shown while a create is in flight.
    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self;

    fn list_path(_offset: u32, _limit: u32) -> String {
        Self::PATH.to_string()
    }

    /// Records in one list response, plus the total when the route pages.
    fn decode_page(body: Value) -> serde_json::Result<(Vec<Self>, Option<u32>)> {
        Ok((serde_json::from_value(body)?, None))
    }
}

impl Record for Transaction {
    const TABLE: &'static str = TABLE_TRANSACTIONS;
    const PATH: &'static str = "/transactions";
    type Draft = CreateTransactionPayload;
    type Patch = UpdateTransactionPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        Transaction {
            id,
            user_id: user_id.to_string(),
            kind: draft.kind,
            amount: draft.amount,
            category: draft.category.clone(),
            description: draft.description.clone(),
            date: draft.date.clone(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn list_path(offset: u32, limit: u32) -> String {
        format!("{}?limit={}&offset={}", Self::PATH, limit, offset)
    }

    fn decode_page(body: Value) -> serde_json::Result<(Vec<Self>, Option<u32>)> {
        let page: ListTransactionsResponse = serde_json::from_value(body)?;
        Ok((page.transactions, Some(page.total_count)))
    }
}

impl Record for Category {
    const TABLE: &'static str = TABLE_CATEGORIES;
    const PATH: &'static str = "/categories";
    type Draft = CreateCategoryPayload;
    type Patch = UpdateCategoryPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        Category {
            id,
            user_id: user_id.to_string(),
            name: draft.name.clone(),
            kind: draft.kind,
            color: draft
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
            icon: draft
                .icon
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY_ICON.to_string()),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Record for Budget {
    const TABLE: &'static str = TABLE_BUDGETS;
    const PATH: &'static str = "/budgets";
    type Draft = CreateBudgetPayload;
    type Patch = UpdateBudgetPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        Budget {
            id,
            user_id: user_id.to_string(),
            category: draft.category.clone(),
            amount: draft.amount,
            month: draft.month.clone(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Record for BalanceCategory {
    const TABLE: &'static str = TABLE_BALANCE_CATEGORIES;
    const PATH: &'static str = "/balance-categories";
    type Draft = BalanceCategoryPayload;
    type Patch = BalanceCategoryPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        BalanceCategory {
            id,
            user_id: user_id.to_string(),
            name: draft.name.clone(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl Record for Balance {
    const TABLE: &'static str = TABLE_BALANCES;
    const PATH: &'static str = "/balances";
    type Draft = CreateBalancePayload;
    type Patch = UpdateBalancePayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        Balance {
            id,
            user_id: user_id.to_string(),
            category_id: draft.category_id.clone(),
            amount: draft.amount,
            created_at: now.clone(),
            updated_at: now,
            category: None,
        }
    }
}

impl Record for PlannedTransaction {
    const TABLE: &'static str = TABLE_PLANNED;
    const PATH: &'static str = "/planned";
    type Draft = CreatePlannedPayload;
    type Patch = UpdatePlannedPayload;

    fn id(&self) -> &str {
        &self.id
    }

    fn provisional(id: String, user_id: &str, draft: &Self::Draft) -> Self {
        let now = now_timestamp();
        PlannedTransaction {
            id,
            user_id: user_id.to_string(),
            month: draft.month.clone(),
            kind: draft.kind,
            category: draft.category.clone(),
            amount: draft.amount,
            description: draft.description.clone(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
