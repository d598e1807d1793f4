//! Building blocks shared by the campus marketplace services: the error
//! taxonomy and JSON envelopes, JWT identity, HTTP middleware, and the
//! database pool.

pub mod clients;
pub mod env;
pub mod errors;
pub mod middleware;
pub mod types;

pub use errors::{AppError, AppResult, ErrorCode, PublicError};
pub use types::*;
