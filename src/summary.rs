//! Aggregation views over cached records.
//!
//! All functions here are pure and run equally on the server (for the summary
//! routes) and on a client-side [`crate::sync`] cache. Non-finite amounts are
//! counted as zero.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use time::{Date, Duration};
use tower_sessions::Session;

use crate::app::AppState;
use crate::auth::get_current_user;
use crate::budgets::query_budgets;
use crate::constants::*;
use crate::models::{Balance, Budget, MonthQuery, PlannedTransaction, Transaction, TransactionType};
use crate::planned::query_planned;
use crate::transactions::all_transactions;
use crate::utils::{ApiError, format_date, month_or_current, today};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BudgetComparison {
    #[serde(flatten)]
    pub budget: Budget,
    pub spent: f64,
    pub remaining: f64,
    pub percentage: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CategoryAmount {
    pub name: String,
    pub value: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MovementPoint {
    pub date: String,
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlanningSummary {
    pub month: String,
    pub total_budget: f64,
    pub real_expenses: f64,
    pub planned_expenses: f64,
    pub total_income: f64,
    pub available: f64,
    pub budget_usage_percentage: f64,
    pub budget_usage_raw: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct PlannedTotals {
    pub income: f64,
    pub expense: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonthlyPlannedTotals {
    pub month: String,
    pub income: f64,
    pub expense: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DashboardSummary {
    pub month: String,
    pub totals: Totals,
    pub month_totals: Totals,
    pub expenses_by_category: Vec<CategoryAmount>,
    pub money_movement: Vec<MovementPoint>,
    pub recent_income: Vec<Transaction>,
    pub recent_expenses: Vec<Transaction>,
}

fn safe(amount: f64) -> f64 {
    if amount.is_finite() { amount } else { 0.0 }
}

fn in_month(date: &str, month: &str) -> bool {
    date.len() >= 7 && date.starts_with(month) && date.as_bytes().get(7).is_none_or(|b| *b == b'-')
}

/// Spent vs budget as a percentage, clamped to `[0, 100]`.
pub fn usage_percentage(spent: f64, budget: f64) -> f64 {
    if budget > 0.0 {
        (spent / budget * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub fn totals(transactions: &[Transaction]) -> Totals {
    let mut totals = Totals::default();
    for t in transactions {
        match t.kind {
            TransactionType::Income => totals.income += safe(t.amount),
            TransactionType::Expense => totals.expenses += safe(t.amount),
        }
    }
    totals.balance = totals.income - totals.expenses;
    totals
}

pub fn month_totals(transactions: &[Transaction], month: &str) -> Totals {
    let in_range: Vec<Transaction> = transactions
        .iter()
        .filter(|t| in_month(&t.date, month))
        .cloned()
        .collect();
    totals(&in_range)
}

fn expenses_in(transactions: &[Transaction], month: &str, category: Option<&str>) -> f64 {
    transactions
        .iter()
        .filter(|t| t.kind == TransactionType::Expense && in_month(&t.date, month))
        .filter(|t| category.is_none_or(|c| t.category == c))
        .map(|t| safe(t.amount))
        .sum()
}

pub fn budget_comparison(
    budgets: &[Budget],
    transactions: &[Transaction],
    month: &str,
) -> Vec<BudgetComparison> {
    budgets
        .iter()
        .filter(|b| b.month == month)
        .map(|budget| {
            let spent = expenses_in(transactions, month, Some(&budget.category));
            BudgetComparison {
                budget: budget.clone(),
                spent,
                remaining: safe(budget.amount) - spent,
                percentage: usage_percentage(spent, safe(budget.amount)),
            }
        })
        .collect()
}

pub fn expenses_by_category(transactions: &[Transaction]) -> Vec<CategoryAmount> {
    let mut by_category: HashMap<&str, f64> = HashMap::new();
    for t in transactions.iter().filter(|t| t.kind == TransactionType::Expense) {
        *by_category.entry(t.category.as_str()).or_insert(0.0) += safe(t.amount);
    }

    let mut result: Vec<CategoryAmount> = by_category
        .into_iter()
        .map(|(name, value)| CategoryAmount {
            name: name.to_string(),
            value,
        })
        .collect();
    result.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    result
}

/// One point per day for the `days` days ending at `end` (inclusive), oldest first.
pub fn money_movement(transactions: &[Transaction], end: Date, days: u32) -> Vec<MovementPoint> {
    (0..days)
        .rev()
        .filter_map(|offset| end.checked_sub(Duration::days(i64::from(offset))))
        .map(|day| {
            let date = format_date(day);
            let mut income = 0.0;
            let mut expenses = 0.0;
            for t in transactions.iter().filter(|t| t.date == date) {
                match t.kind {
                    TransactionType::Income => income += safe(t.amount),
                    TransactionType::Expense => expenses += safe(t.amount),
                }
            }
            MovementPoint {
                date,
                income,
                expenses,
                balance: income - expenses,
            }
        })
        .collect()
}

pub fn planning_summary(
    month: &str,
    budgets: &[Budget],
    transactions: &[Transaction],
    planned: &[PlannedTransaction],
) -> PlanningSummary {
    let total_budget: f64 = budgets
        .iter()
        .filter(|b| b.month == month)
        .map(|b| safe(b.amount))
        .sum();
    let real_expenses = expenses_in(transactions, month, None);
    let total_income: f64 = transactions
        .iter()
        .filter(|t| t.kind == TransactionType::Income && in_month(&t.date, month))
        .map(|t| safe(t.amount))
        .sum();
    let planned_expenses: f64 = planned
        .iter()
        .filter(|p| p.kind == TransactionType::Expense && p.month == month)
        .map(|p| safe(p.amount))
        .sum();

    let committed = real_expenses + planned_expenses;
    let budget_usage_raw = if total_budget > 0.0 {
        committed / total_budget * 100.0
    } else {
        0.0
    };

    PlanningSummary {
        month: month.to_string(),
        total_budget,
        real_expenses,
        planned_expenses,
        total_income,
        available: total_income - real_expenses - planned_expenses,
        budget_usage_percentage: usage_percentage(committed, total_budget),
        budget_usage_raw,
    }
}

pub fn planned_totals_by_month(planned: &[PlannedTransaction]) -> Vec<MonthlyPlannedTotals> {
    let mut by_month: BTreeMap<&str, PlannedTotals> = BTreeMap::new();
    for p in planned {
        let bucket = by_month.entry(p.month.as_str()).or_default();
        match p.kind {
            TransactionType::Income => bucket.income += safe(p.amount),
            TransactionType::Expense => bucket.expense += safe(p.amount),
        }
    }
    by_month
        .into_iter()
        .map(|(month, t)| MonthlyPlannedTotals {
            month: month.to_string(),
            income: t.income,
            expense: t.expense,
        })
        .collect()
}

/// The `n` most recent transactions of one kind, newest first.
pub fn recent_by_type(transactions: &[Transaction], kind: TransactionType, n: usize) -> Vec<Transaction> {
    let mut matching: Vec<Transaction> = transactions
        .iter()
        .filter(|t| t.kind == kind)
        .cloned()
        .collect();
    matching.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    matching.truncate(n);
    matching
}

pub fn balance_total(balances: &[Balance]) -> f64 {
    balances.iter().map(|b| safe(b.amount)).sum()
}

pub fn dashboard(transactions: &[Transaction], month: &str, end: Date) -> DashboardSummary {
    DashboardSummary {
        month: month.to_string(),
        totals: totals(transactions),
        month_totals: month_totals(transactions, month),
        expenses_by_category: expenses_by_category(transactions),
        money_movement: money_movement(transactions, end, MONEY_MOVEMENT_DAYS),
        recent_income: recent_by_type(transactions, TransactionType::Income, RECENT_TRANSACTIONS_COUNT),
        recent_expenses: recent_by_type(transactions, TransactionType::Expense, RECENT_TRANSACTIONS_COUNT),
    }
}

pub async fn dashboard_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MonthQuery>,
) -> Result<(StatusCode, Json<DashboardSummary>), ApiError> {
    let user = get_current_user(&session).await?;
    let month = month_or_current(query.month.as_deref())?;
    let db = state.user_db(&user.id).await?;

    let transactions = all_transactions(&db, &user.id).await?;
    Ok((StatusCode::OK, Json(dashboard(&transactions, &month, today()))))
}

pub async fn budget_comparison_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MonthQuery>,
) -> Result<(StatusCode, Json<Vec<BudgetComparison>>), ApiError> {
    let user = get_current_user(&session).await?;
    let month = month_or_current(query.month.as_deref())?;
    let db = state.user_db(&user.id).await?;

    let budgets = query_budgets(&db, &user.id, Some(&month)).await?;
    let transactions = all_transactions(&db, &user.id).await?;
    Ok((
        StatusCode::OK,
        Json(budget_comparison(&budgets, &transactions, &month)),
    ))
}

pub async fn planning_summary_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<MonthQuery>,
) -> Result<(StatusCode, Json<PlanningSummary>), ApiError> {
    let user = get_current_user(&session).await?;
    let month = month_or_current(query.month.as_deref())?;
    let db = state.user_db(&user.id).await?;

    let budgets = query_budgets(&db, &user.id, Some(&month)).await?;
    let transactions = all_transactions(&db, &user.id).await?;
    let planned = query_planned(&db, &user.id, Some(&month)).await?;
    Ok((
        StatusCode::OK,
        Json(planning_summary(&month, &budgets, &transactions, &planned)),
    ))
}
