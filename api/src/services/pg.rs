//! Postgres handles for the transaction engine, drawn from the sqlx pool

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};

use super::db::{DbError, Handle, HandleProvider};

#[derive(Clone)]
pub struct PgProvider {
    pool: PgPool,
}

impl PgProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl HandleProvider for PgProvider {
    type Handle = PgHandle;

    async fn open(&self) -> Result<PgHandle, DbError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::Unavailable(Box::new(e)))?;

        Ok(PgHandle {
            conn,
            in_transaction: false,
        })
    }
}

/// A pooled connection. Returned to the pool on drop, unless it is still
/// inside a transaction, in which case it is closed instead.
pub struct PgHandle {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl Handle for PgHandle {
    type Conn = PgConnection;

    async fn begin(&mut self) -> Result<(), DbError> {
        sqlx::query("BEGIN").execute(&mut *self.conn).await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            return Ok(());
        }
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.in_transaction = false;
        Ok(())
    }

    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl Drop for PgHandle {
    fn drop(&mut self) {
        // e.g. the request future was cancelled mid-attempt
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}
