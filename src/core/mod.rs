//! Core constants, shared types and error taxonomy.

pub mod constants;
mod error;
mod types;

pub use error::*;
pub use types::*;
