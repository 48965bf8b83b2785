//! SQL compilation: identifiers come from resolved descriptors only, values travel as parameters.

pub mod builder;
pub mod params;
pub mod predicate;
pub use builder::*;
pub use params::*;
pub use predicate::{column_predicate, Predicate};
