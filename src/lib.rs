//! Receipt fraud scoring and evidence memory for procurement audits.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{AuditError, Result};
