//! Types shared across the classroom credential broker crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
