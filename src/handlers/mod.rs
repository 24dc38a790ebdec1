//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `token` - Ephemeral credential minting for realtime sessions

pub mod api;
pub mod token;
