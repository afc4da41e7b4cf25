//! Database layer
//!
//! SQLite (default, single-file deployment) or MySQL, selected by
//! configuration. Repositories hide the difference from the services.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
