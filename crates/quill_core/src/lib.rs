pub mod config;
pub mod error_handler;
pub mod logging;

pub use config::QuillConfig;
pub use error_handler::{ClassifiedError, ErrorCategory, QuillError, classify_error};
