pub mod config;
pub mod eq;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod state;
