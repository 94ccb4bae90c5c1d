//! Domain data types.

pub mod config;
pub mod record;
