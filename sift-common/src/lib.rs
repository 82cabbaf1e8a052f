//! # PhotoSift Common Library
//!
//! Shared code for the PhotoSift services:
//! - Error type used across crates
//! - Root folder / TOML configuration loading
//! - Event types and the broadcast `EventBus`
//! - Database bootstrap (connection pool, settings table)

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
