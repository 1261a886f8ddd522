pub mod admin;
pub mod board;
pub mod config;
pub mod error;
pub mod frame;
pub mod lobby;
pub mod matchlog;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod schedule;
pub mod session;
pub mod store;
pub mod store_sqlite;
