//! Application constants

use std::time::Duration;

/// Attempts a transaction gets before the engine gives up
pub const MAX_RETRIES: u32 = 5;

/// Backoff between attempts grows by this much per retry consumed (1s, 2s, 3s, 4s)
pub const BACKOFF_STEP: Duration = Duration::from_secs(1);

/// SQLSTATE Postgres reports when it kills a transaction to break a deadlock
pub const POSTGRES_DEADLOCK_CODE: &str = "40P01";

/// Cookie carrying the authentication token from the browser
pub const AUTH_COOKIE: &str = "AUTH";

/// Users seeded into the credential store when EXPENSEY_USERS is not set
pub const DEFAULT_USERS: &str = "user@mac.com:Welcome123,user@gmail.com:Welcome123";
