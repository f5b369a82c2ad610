pub mod error;
pub mod validation;

pub use error::{BoxError, Error, Result};
pub use validation::IdentValidator;
