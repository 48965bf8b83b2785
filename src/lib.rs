//! Table CRUD router: declarative REST endpoints over PostgreSQL tables.
//!
//! Table definitions and router configs resolve into immutable descriptors at startup; each
//! request is decoded against its operation schema, compiled into one parameterized statement,
//! executed in a scoped session and shaped back into JSON.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod types;

pub use config::{load_from_path, reflect_table, resolve, CrudConfig, ResolvedRouter, RouterConfig, TableConfig};
pub use error::{AppError, ConfigError, StoreError};
pub use response::Outcome;
pub use routes::{common_routes, table_routes, TableRouter};
pub use schema::{OperationKind, OperationSchema};
pub use service::CrudService;
pub use store::{Database, PgStore, Session};
