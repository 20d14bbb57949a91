use std::ops::Deref;

use super::{Collection, Source};
use crate::models::Transaction;
use crate::summary::{self, CategoryAmount, Totals};

/// Transaction collection with the derived totals the dashboard reads.
pub struct TransactionStore<S: Source<Transaction>> {
    inner: Collection<Transaction, S>,
}

impl<S: Source<Transaction>> TransactionStore<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Collection::new(source),
        }
    }

    pub async fn totals(&self) -> Totals {
        summary::totals(&self.inner.items().await)
    }

    pub async fn month_totals(&self, month: &str) -> Totals {
        summary::month_totals(&self.inner.items().await, month)
    }

    pub async fn expenses_by_category(&self) -> Vec<CategoryAmount> {
        summary::expenses_by_category(&self.inner.items().await)
    }
}

impl<S: Source<Transaction>> Deref for TransactionStore<S> {
    type Target = Collection<Transaction, S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
