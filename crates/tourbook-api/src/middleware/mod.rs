//! Tower middleware that is not tied to authentication or error handling.

pub mod rate_limit;
pub mod security_headers;
