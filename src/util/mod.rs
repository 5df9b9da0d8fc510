//! Utility functions shared across the proxy.
//!
//! - **URL validation**: instance base URLs from configuration or a scraped
//!   directory page
//! - **Body reading**: size-limited response bodies for feeds and the
//!   instance directory
//! - **Text processing**: control-character stripping and title truncation
//! - **HTTP client**: shared client with a bounded redirect policy

mod body;
mod http;
mod text;
mod url_validator;

pub use body::{read_limited_bytes, BodyError};
pub use http::build_client;
pub use text::{strip_control_chars, truncate_chars};
pub use url_validator::{validate_instance_url, UrlValidationError};
