//! HTTP handlers for table operations.

pub mod table;
