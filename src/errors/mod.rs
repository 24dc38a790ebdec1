//! Error types for the HTTP layer.

pub mod app_error;
