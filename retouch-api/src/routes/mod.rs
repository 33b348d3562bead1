/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `photos`: Upload, status, enhancement and retry
/// - `account`: Credit balance and quotas
/// - `webhooks`: Payment provider callbacks

pub mod account;
pub mod health;
pub mod photos;
pub mod webhooks;
