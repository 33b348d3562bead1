/// Middleware modules for the API server
///
/// - `identity`: Resolves the calling user from the gateway header
/// - `security`: Security response headers

pub mod identity;
pub mod security;
