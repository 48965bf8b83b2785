pub mod loader;
pub mod resolved;
pub mod types;
pub mod validator;

pub use loader::*;
pub use resolved::*;
pub use types::*;
pub use validator::*;

#[cfg(test)]
pub(crate) use resolved::test_helper;
