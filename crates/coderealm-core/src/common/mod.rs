pub mod error;
pub mod types;

pub use error::{AggregateError, Error, Result};
