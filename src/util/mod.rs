//! Small helpers shared across modules.
//!
//! - **Endpoint validation**: https-only remote URLs (loopback excepted)
//! - **Task supervision**: panic capture for detached background work

mod task;
mod url_validator;

pub use task::catch_task_panic;
pub use url_validator::{validate_endpoint, UrlValidationError};
