//! Expense storage and validation
//!
//! `ExpenseStore::Sql` runs every operation as one unit of work through the
//! [`Transactor`], so a deadlocked or briefly unreachable database is retried
//! before the request fails. `ExpenseStore::Memory` keeps expenses in process,
//! for local runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::expenses;
use crate::models::{Expense, ExpenseInput};
use crate::services::db::{Transactor, TxOutcome};
use crate::services::pg::PgProvider;

#[derive(Debug, thiserror::Error)]
pub enum ExpenseError {
    #[error("missing or invalid expense fields")]
    Invalid,
    #[error("expense not found")]
    NotFound,
    #[error("expense transaction did not commit")]
    Storage,
}

/// Validated expense fields, not yet stored
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub description: String,
}

impl NewExpense {
    fn validate(input: ExpenseInput) -> Result<Self, ExpenseError> {
        let amount = input
            .amount
            .filter(|a| a.is_finite())
            .ok_or(ExpenseError::Invalid)?;
        let date = input.date.ok_or(ExpenseError::Invalid)?;
        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or(ExpenseError::Invalid)?;

        Ok(Self {
            amount,
            date,
            description,
        })
    }

    fn into_expense(self, id: i64, user_id: &str) -> Expense {
        Expense {
            id,
            amount: self.amount,
            date: self.date,
            description: self.description,
            user_id: user_id.to_string(),
        }
    }
}

pub struct SqlExpenseStore {
    db: Transactor<PgProvider>,
}

/// Turn a transaction outcome into the committed value, or a storage error
fn committed<T>(outcome: TxOutcome<T>, operation: &str) -> Result<T, ExpenseError> {
    let attempts = outcome.attempts();
    match outcome.into_value() {
        Some(value) => Ok(value),
        None => {
            warn!(operation, attempts, "expense transaction did not commit");
            Err(ExpenseError::Storage)
        }
    }
}

impl SqlExpenseStore {
    pub fn new(db: Transactor<PgProvider>) -> Self {
        Self { db }
    }

    pub async fn create_tables(&self) -> Result<(), ExpenseError> {
        let ok = self
            .db
            .transact(|conn| {
                Box::pin(async move {
                    expenses::create_table(&mut *conn).await?;
                    expenses::create_user_index(&mut *conn).await?;
                    Ok(())
                })
            })
            .await;

        if !ok {
            return Err(ExpenseError::Storage);
        }
        info!("expense tables ready");
        Ok(())
    }

    async fn create(&self, new: NewExpense, user_id: &str) -> Result<Expense, ExpenseError> {
        let outcome = self
            .db
            .run(|conn| {
                let new = new.clone();
                let user_id = user_id.to_string();
                Box::pin(async move {
                    let id = expenses::insert_expense(
                        &mut *conn,
                        &user_id,
                        new.date,
                        new.amount,
                        &new.description,
                    )
                    .await?;
                    Ok(new.into_expense(id, &user_id))
                })
            })
            .await;

        committed(outcome, "create")
    }

    async fn read(&self, id: i64) -> Result<Option<Expense>, ExpenseError> {
        let outcome = self
            .db
            .run(move |conn| Box::pin(async move { Ok(expenses::get_expense(&mut *conn, id).await?) }))
            .await;

        committed(outcome, "read")
    }

    async fn read_for_user(&self, user_id: &str) -> Result<Vec<Expense>, ExpenseError> {
        let outcome = self
            .db
            .run(|conn| {
                let user_id = user_id.to_string();
                Box::pin(async move {
                    Ok(expenses::list_expenses_for_user(&mut *conn, &user_id).await?)
                })
            })
            .await;

        committed(outcome, "read_for_user")
    }

    async fn update(&self, expense: &Expense) -> Result<bool, ExpenseError> {
        let outcome = self
            .db
            .run(|conn| {
                let expense = expense.clone();
                Box::pin(async move { Ok(expenses::update_expense(&mut *conn, &expense).await?) })
            })
            .await;

        committed(outcome, "update").map(|rows| rows > 0)
    }

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, ExpenseError> {
        let outcome = self
            .db
            .run(|conn| {
                let user_id = user_id.to_string();
                Box::pin(async move { Ok(expenses::delete_expense(&mut *conn, id, &user_id).await?) })
            })
            .await;

        committed(outcome, "delete").map(|rows| rows > 0)
    }
}

/// In-process storage. Ids come from an atomic counter.
#[derive(Default)]
pub struct MemExpenseStore {
    next_id: AtomicI64,
    expenses: RwLock<HashMap<i64, Expense>>,
}

impl MemExpenseStore {
    async fn create(&self, new: NewExpense, user_id: &str) -> Expense {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let expense = new.into_expense(id, user_id);
        self.expenses.write().await.insert(id, expense.clone());
        expense
    }

    async fn read(&self, id: i64) -> Option<Expense> {
        self.expenses.read().await.get(&id).cloned()
    }

    async fn read_for_user(&self, user_id: &str) -> Vec<Expense> {
        let mut found: Vec<Expense> = self
            .expenses
            .read()
            .await
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        found
    }

    async fn update(&self, expense: &Expense) -> bool {
        match self.expenses.write().await.get_mut(&expense.id) {
            Some(existing) if existing.user_id == expense.user_id => {
                *existing = expense.clone();
                true
            }
            _ => false,
        }
    }

    async fn delete(&self, id: i64, user_id: &str) -> bool {
        let mut expenses = self.expenses.write().await;
        let owned = expenses.get(&id).is_some_and(|e| e.user_id == user_id);
        if owned {
            expenses.remove(&id);
        }
        owned
    }
}

pub enum ExpenseStore {
    Sql(SqlExpenseStore),
    Memory(MemExpenseStore),
}

impl ExpenseStore {
    async fn create(&self, new: NewExpense, user_id: &str) -> Result<Expense, ExpenseError> {
        match self {
            ExpenseStore::Sql(store) => store.create(new, user_id).await,
            ExpenseStore::Memory(store) => Ok(store.create(new, user_id).await),
        }
    }

    async fn read(&self, id: i64) -> Result<Option<Expense>, ExpenseError> {
        match self {
            ExpenseStore::Sql(store) => store.read(id).await,
            ExpenseStore::Memory(store) => Ok(store.read(id).await),
        }
    }

    async fn read_for_user(&self, user_id: &str) -> Result<Vec<Expense>, ExpenseError> {
        match self {
            ExpenseStore::Sql(store) => store.read_for_user(user_id).await,
            ExpenseStore::Memory(store) => Ok(store.read_for_user(user_id).await),
        }
    }

    async fn update(&self, expense: &Expense) -> Result<bool, ExpenseError> {
        match self {
            ExpenseStore::Sql(store) => store.update(expense).await,
            ExpenseStore::Memory(store) => Ok(store.update(expense).await),
        }
    }

    async fn delete(&self, id: i64, user_id: &str) -> Result<bool, ExpenseError> {
        match self {
            ExpenseStore::Sql(store) => store.delete(id, user_id).await,
            ExpenseStore::Memory(store) => Ok(store.delete(id, user_id).await),
        }
    }
}

/// Expense operations on behalf of an authenticated user
pub struct ExpenseService {
    store: ExpenseStore,
}

impl ExpenseService {
    pub fn new(store: ExpenseStore) -> Self {
        Self { store }
    }

    pub async fn add_expense(
        &self,
        input: ExpenseInput,
        user_id: &str,
    ) -> Result<Expense, ExpenseError> {
        let new = NewExpense::validate(input)?;
        self.store.create(new, user_id).await
    }

    pub async fn get_expenses_for_user(&self, user_id: &str) -> Result<Vec<Expense>, ExpenseError> {
        self.store.read_for_user(user_id).await
    }

    /// Another user's expense reads as not found
    pub async fn get_expense(&self, id: i64, user_id: &str) -> Result<Expense, ExpenseError> {
        self.store
            .read(id)
            .await?
            .filter(|e| e.user_id == user_id)
            .ok_or(ExpenseError::NotFound)
    }

    pub async fn update_expense(
        &self,
        id: i64,
        input: ExpenseInput,
        user_id: &str,
    ) -> Result<Expense, ExpenseError> {
        let expense = NewExpense::validate(input)?.into_expense(id, user_id);
        if self.store.update(&expense).await? {
            Ok(expense)
        } else {
            Err(ExpenseError::NotFound)
        }
    }

    pub async fn delete_expense(&self, id: i64, user_id: &str) -> Result<(), ExpenseError> {
        if self.store.delete(id, user_id).await? {
            Ok(())
        } else {
            Err(ExpenseError::NotFound)
        }
    }
}
