//! Session and transport configuration.

mod option;
mod session;

pub use option::*;
pub use session::*;
