use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tempfile::tempdir;
use time::macros::date;
use tokio::runtime::Runtime;
use uuid::Uuid;

use personal_finance::database::{Db, get_user_db, init_main_db};
use personal_finance::models::{ListTransactionsQuery, Transaction, TransactionType};
use personal_finance::summary::{dashboard, expenses_by_category};
use personal_finance::transactions::{all_transactions, query_transactions};

const BENCH_TRANSACTION_COUNT: usize = 1000;

async fn setup_benchmark_environment() -> (Db, String, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let data_path = temp_dir.path().to_str().unwrap().to_string();
    let user_id = Uuid::new_v4().to_string();

    init_main_db(&data_path).await.unwrap();
    let db = get_user_db(&data_path, &user_id).await.unwrap();

    (db, user_id, temp_dir)
}

async fn create_benchmark_transactions(db: &Db, user_id: &str, count: usize) {
    let conn = db.write().await;

    for i in 0..count {
        let kind = if i % 4 == 0 { "income" } else { "expense" };
        let amount = 10.0 + (i % 100) as f64;
        let category = format!("category_{}", i % 10);
        let date = format!("2024-{:02}-{:02}", 1 + i % 12, 1 + i % 28);
        let now = format!("2024-01-01T00:00:{:02}.000000Z", i % 60);

        conn.execute(
            "INSERT INTO transactions (id, user_id, type, amount, category, description, date, created_at, updated_at) VALUES (?, ?, ?, ?, ?, '', ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                user_id,
                kind,
                amount,
                category.as_str(),
                date.as_str(),
                now.as_str(),
                now.as_str(),
            ),
        )
        .await
        .unwrap();
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (db, user_id, _temp_dir) = rt.block_on(setup_benchmark_environment());
    rt.block_on(create_benchmark_transactions(&db, &user_id, BENCH_TRANSACTION_COUNT));
    let (db, user_id) = (&db, user_id.as_str());

    c.bench_function("list_transactions_default", |b| {
        b.to_async(&rt).iter(move || async move {
            let response = query_transactions(db, user_id, &ListTransactionsQuery::default())
                .await
                .unwrap();
            black_box(response.total_count);
        })
    });

    c.bench_function("list_transactions_month_filter", |b| {
        let query = ListTransactionsQuery {
            kind: Some(TransactionType::Expense),
            month: Some("2024-03".to_string()),
            ..Default::default()
        };
        let query = &query;
        b.to_async(&rt).iter(move || async move {
            let response = query_transactions(db, user_id, query).await.unwrap();
            black_box(response.transactions.len());
        })
    });

    let transactions: Vec<Transaction> = rt.block_on(all_transactions(db, user_id)).unwrap();

    c.bench_function("dashboard_aggregation", |b| {
        b.iter(|| black_box(dashboard(&transactions, "2024-03", date!(2024 - 03 - 31))))
    });

    c.bench_function("expenses_by_category", |b| {
        b.iter(|| black_box(expenses_by_category(&transactions)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
