//! Expense domain - DB queries for expenses
//!
//! Every function takes a generic Executor, so the same query runs on a pool
//! or, as the expense store does, on the connection a transaction unit of
//! work is handed.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

use crate::models::Expense;

#[derive(Debug, sqlx::FromRow)]
struct ExpenseRow {
    id: i64,
    user_id: String,
    date: i64,
    amount: f64,
    description: String,
}

impl From<ExpenseRow> for Expense {
    fn from(row: ExpenseRow) -> Self {
        Expense {
            id: row.id,
            amount: row.amount,
            // dates are stored as epoch milliseconds
            date: DateTime::from_timestamp_millis(row.date).unwrap_or_default(),
            description: row.description,
            user_id: row.user_id,
        }
    }
}

pub async fn create_table<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id BIGSERIAL PRIMARY KEY,
            user_id TEXT NOT NULL,
            date BIGINT NOT NULL,
            amount DOUBLE PRECISION NOT NULL,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn create_user_index<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("CREATE INDEX IF NOT EXISTS expenses_user_id ON expenses (user_id)")
        .execute(executor)
        .await?;

    Ok(())
}

/// Insert an expense, returning its generated id
pub async fn insert_expense<'e, E>(
    executor: E,
    user_id: &str,
    date: DateTime<Utc>,
    amount: f64,
    description: &str,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO expenses (user_id, date, amount, description)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(date.timestamp_millis())
    .bind(amount)
    .bind(description)
    .fetch_one(executor)
    .await?;

    Ok(row.0)
}

pub async fn get_expense<'e, E>(executor: E, id: i64) -> Result<Option<Expense>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<ExpenseRow> = sqlx::query_as(
        "SELECT id, user_id, date, amount, description FROM expenses WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(Expense::from))
}

pub async fn list_expenses_for_user<'e, E>(
    executor: E,
    user_id: &str,
) -> Result<Vec<Expense>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<ExpenseRow> = sqlx::query_as(
        r#"
        SELECT id, user_id, date, amount, description FROM expenses
        WHERE user_id = $1
        ORDER BY date, id
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Expense::from).collect())
}

/// Update an expense owned by `expense.user_id`. Returns rows affected.
pub async fn update_expense<'e, E>(executor: E, expense: &Expense) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE expenses
        SET date = $1, amount = $2, description = $3
        WHERE id = $4 AND user_id = $5
        "#,
    )
    .bind(expense.date.timestamp_millis())
    .bind(expense.amount)
    .bind(&expense.description)
    .bind(expense.id)
    .bind(&expense.user_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Delete an expense owned by `user_id`. Returns rows affected.
pub async fn delete_expense<'e, E>(executor: E, id: i64, user_id: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM expenses WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
