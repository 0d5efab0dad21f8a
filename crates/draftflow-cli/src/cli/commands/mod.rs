//! CLI command handlers.

pub mod analyze;
pub mod config;
pub mod expand;
pub mod export;
pub mod generate;
