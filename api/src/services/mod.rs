pub mod auth;
pub mod cookies;
pub mod db;
pub mod error;
pub mod expenses;
pub mod pg;
