//! Utility modules
//!
//! Common utilities used across the application.

pub mod error;
pub mod notify;

pub use error::{AppError, AppResult, ErrorResponse};
pub use notify::Notifier;
