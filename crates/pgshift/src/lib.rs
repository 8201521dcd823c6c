//! Schema diffing and migrations for Postgres.
//!
//! This crate provides:
//! - A schema model shared by the live database and the desired schema
//! - Introspection of the live schema from the Postgres catalog
//! - A diff engine emitting ordered up and down DDL
//! - Versioned migration files and a transactional executor
//!
//! # Flow
//!
//! ```text
//! desired JSON ──parse_desired_schema──┐
//!                                      ├─ Schema::diff ─► MigrationSql ─► MigrationStore
//! live database ──Introspector::load───┘                                      │
//!                                                                             ▼
//!                                    __pgshift_migrations__ ◄── Migrator::execute
//! ```
//!
//! ```ignore
//! let client = pgshift::connect(&ConnectParams::from_env(&EnvKeys::default())?).await?;
//! let mut migrator = Migrator::new(client, MigrationStore::default(), Introspector::default());
//!
//! let version = migrator
//!     .generate_diff(&FileProvider::new("schema.json"), IntrospectMode::Live)
//!     .await?;
//! migrator.execute(&version, Direction::Up).await?;
//! ```
//!
//! # What the diff covers
//!
//! Tables and columns are created and dropped; nullability, single-column
//! unique constraints and foreign keys are reconciled on existing columns.
//! Column types, defaults and indexes of existing columns are not compared.
//! Dropping a column or table is generated like any other change, whatever
//! data it holds.

mod connect;
mod diff;
mod error;
mod introspect;
mod migrator;
mod provider;
mod schema;
pub mod sql;
mod store;
mod traced;

pub use connect::{ConnectParams, EnvKeys, connect};
pub use diff::MigrationSql;
pub use error::Error;
pub use introspect::{
    IntrospectMode, Introspector, SCHEMA_INFO_VIEW, SCHEMA_INFO_VIEW_SQL, SchemaInfoRow,
    TRACKING_TABLE,
};
pub use migrator::{MigrationStatus, Migrator, Outcome, SkipReason, plan_down, plan_up};
pub use provider::{FileProvider, SchemaProvider, StaticProvider, parse_desired_schema};
pub use schema::{
    Column, Constraint, ConstraintKind, ForeignKeyDetails, Index, Schema, Source, Table,
};
pub use store::{DEFAULT_MIGRATIONS_DIR, Direction, FileStatus, MigrationStore};
pub use traced::{Connection, ConnectionExt, TracedConn};

/// Result type for pgshift operations.
pub type Result<T> = std::result::Result<T, Error>;
