//! Request pipeline: decode, compile, execute, shape.

mod crud;
pub mod decode;
pub mod shape;
pub mod validation;
pub use crud::{CrudService, CONFLICT_MISS, DUPLICATE};
pub use decode::{is_batch_body, NormalizedRequest, RawRequest, RequestDecoder};
pub use validation::FieldValidator;
