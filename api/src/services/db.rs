//! Database transaction engine
//!
//! [`Transactor`] runs a unit of work inside one transaction on a freshly
//! acquired handle. When the attempt fails for a reason a retry can fix (no
//! connection could be obtained, or the database killed the transaction to
//! break a deadlock) the handle is rolled back and released, the engine backs
//! off, and the unit of work runs again on a new handle. Any other failure
//! rolls back and stops immediately.
//!
//! # Usage Pattern
//!
//! The unit of work has the same shape as the closure taken by
//! `sqlx::Connection::transaction`: it receives the handle's connection and
//! returns a boxed future. Captured inputs are cloned into each attempt, since
//! the closure may run more than once.
//!
//! ```ignore
//! let outcome = transactor
//!     .run(|conn| {
//!         let user = user.clone();
//!         Box::pin(async move { Ok(expenses::list_for_user(conn, &user).await?) })
//!     })
//!     .await;
//!
//! let rows = outcome.into_value().unwrap_or_default();
//! ```
//!
//! The engine owns `begin`, `commit` and `rollback`; the unit of work must not
//! issue them itself.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::constants::{BACKOFF_STEP, MAX_RETRIES, POSTGRES_DEADLOCK_CODE};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors seen while acquiring a handle or running a unit of work
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The provider could not hand out a connection
    #[error("unable to obtain connection: {0}")]
    Unavailable(#[source] BoxError),

    /// A statement failed. `code` is the vendor error code, if the driver gave one.
    #[error("database error: {message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl DbError {
    /// Vendor error code carried by a database error
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => DbError::Database {
                code: db_err.code().map(|c| c.into_owned()),
                message: db_err.message().to_string(),
            },
            _ => DbError::Database {
                code: None,
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Fatal,
}

/// Decides which failures are worth another attempt.
///
/// Deadlock codes are vendor specific (Postgres `40P01`, MySQL `1213`), so
/// they are supplied per backend rather than baked into the engine.
#[derive(Debug, Clone)]
pub struct Classifier {
    deadlock_codes: Vec<String>,
}

impl Classifier {
    pub fn new<I, S>(deadlock_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deadlock_codes: deadlock_codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn postgres() -> Self {
        Self::new([POSTGRES_DEADLOCK_CODE])
    }

    pub fn is_deadlock(&self, code: &str) -> bool {
        self.deadlock_codes.iter().any(|c| c == code)
    }

    pub fn classify(&self, err: &DbError) -> Classification {
        match err {
            DbError::Unavailable(_) => Classification::Transient,
            DbError::Database {
                code: Some(code), ..
            } if self.is_deadlock(code) => Classification::Transient,
            _ => Classification::Fatal,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::postgres()
    }
}

/// Source of fresh handles. Must tolerate concurrent `open` calls.
pub trait HandleProvider: Send + Sync {
    type Handle: Handle;

    /// Acquire a handle, or `DbError::Unavailable` if no connection can be had
    fn open(&self) -> impl Future<Output = Result<Self::Handle, DbError>> + Send;
}

/// One live connection, exclusively owned by a single attempt.
///
/// Dropping the handle releases it, whatever state it is in.
pub trait Handle: Send {
    type Conn: Send;

    fn begin(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;
    fn commit(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;
    fn rollback(&mut self) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Statement surface handed to the unit of work
    fn conn(&mut self) -> &mut Self::Conn;
}

/// Connection type a unit of work receives from provider `P`
pub type Conn<P> = <<P as HandleProvider>::Handle as Handle>::Conn;

/// Result of a single attempt
#[derive(Debug)]
enum AttemptOutcome<T> {
    Committed(T),
    TransientFailure,
    FatalFailure,
}

/// Result of a whole `run`, across every attempt it made
#[derive(Debug)]
pub enum TxOutcome<T> {
    Committed { value: T, attempts: u32 },
    /// Every attempt failed transiently
    Exhausted { attempts: u32 },
    /// A fatal failure stopped the loop
    Aborted { attempts: u32 },
}

impl<T> TxOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TxOutcome::Committed { attempts, .. }
            | TxOutcome::Exhausted { attempts }
            | TxOutcome::Aborted { attempts } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            TxOutcome::Committed { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Pause before the next attempt, given the retries still left (1s, 2s, 3s, 4s).
pub fn backoff_delay(retries_left: u32) -> Duration {
    BACKOFF_STEP * MAX_RETRIES.saturating_sub(retries_left)
}

pub struct Transactor<P> {
    provider: P,
    classifier: Classifier,
}

impl<P: HandleProvider> Transactor<P> {
    pub fn new(provider: P, classifier: Classifier) -> Self {
        Self {
            provider,
            classifier,
        }
    }

    /// Run `work` in a transaction, retrying transient failures.
    /// Returns true only if some attempt committed.
    pub async fn transact<T, F>(&self, work: F) -> bool
    where
        T: Send,
        F: for<'c> FnMut(&'c mut Conn<P>) -> BoxFuture<'c, Result<T, DbError>> + Send,
    {
        self.run(work).await.is_committed()
    }

    /// Like [`Transactor::transact`], but reports how the loop ended and hands
    /// back the value produced by the committed attempt.
    pub async fn run<T, F>(&self, mut work: F) -> TxOutcome<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut Conn<P>) -> BoxFuture<'c, Result<T, DbError>> + Send,
    {
        let mut retries = MAX_RETRIES;
        let mut attempts = 0;

        while retries > 0 {
            attempts += 1;

            let outcome = match self.provider.open().await {
                // the handle is released when this arm ends, on every path
                Ok(mut handle) => self.attempt(&mut handle, &mut work, attempts).await,
                Err(err) => {
                    warn!(attempt = attempts, error = %err, "transact: retry: database unavailable");
                    AttemptOutcome::TransientFailure
                }
            };

            match outcome {
                AttemptOutcome::Committed(value) => {
                    return TxOutcome::Committed { value, attempts };
                }
                AttemptOutcome::FatalFailure => return TxOutcome::Aborted { attempts },
                AttemptOutcome::TransientFailure => {
                    retries -= 1;
                    if retries > 0 {
                        tokio::time::sleep(backoff_delay(retries)).await;
                    }
                }
            }
        }

        error!(attempts, "transact: giving up, retries exhausted");
        TxOutcome::Exhausted { attempts }
    }

    async fn attempt<T, F>(
        &self,
        handle: &mut P::Handle,
        work: &mut F,
        attempt: u32,
    ) -> AttemptOutcome<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut Conn<P>) -> BoxFuture<'c, Result<T, DbError>> + Send,
    {
        let err = match execute::<P, T, F>(handle, work).await {
            Ok(value) => {
                debug!(attempt, "transact: committed");
                return AttemptOutcome::Committed(value);
            }
            Err(err) => err,
        };

        if let Err(rollback_err) = handle.rollback().await {
            warn!(attempt, error = %rollback_err, "transact: rollback failed");
        }

        match self.classifier.classify(&err) {
            Classification::Transient => {
                warn!(attempt, code = err.code().unwrap_or("-"), error = %err, "transact: retry");
                AttemptOutcome::TransientFailure
            }
            Classification::Fatal => {
                error!(attempt, code = err.code().unwrap_or("-"), error = %err, "transact: fatal");
                AttemptOutcome::FatalFailure
            }
        }
    }
}

async fn execute<P, T, F>(handle: &mut P::Handle, work: &mut F) -> Result<T, DbError>
where
    P: HandleProvider,
    T: Send,
    F: for<'c> FnMut(&'c mut Conn<P>) -> BoxFuture<'c, Result<T, DbError>> + Send,
{
    handle.begin().await?;

    // the call itself happens inside the guard: the closure may panic before
    // it returns a future
    let ran = AssertUnwindSafe(async { work(handle.conn()).await })
        .catch_unwind()
        .await;
    let value = match ran {
        Ok(result) => result?,
        Err(payload) => return Err(DbError::Unexpected(panic_message(payload.as_ref()))),
    };

    handle.commit().await?;
    Ok(value)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("unit of work panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("unit of work panicked: {}", msg)
    } else {
        "unit of work panicked".to_string()
    }
}
