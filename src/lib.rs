// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer

// Module declarations
pub mod commands;
pub mod config;
pub mod datastore;
pub mod events;
pub mod generation;
pub mod models;
pub mod orchestrator;
pub mod realtime;
pub mod shutdown;
pub mod templates;
mod utils;

// Server module (HTTP/WebSocket API)
pub mod server;

// Re-export models for convenience
pub use models::*;
