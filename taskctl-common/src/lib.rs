pub mod crypto;
pub mod error;
pub mod models;
pub mod signal;
pub mod tracing;

pub use error::{Error, ErrorKind, Result};
