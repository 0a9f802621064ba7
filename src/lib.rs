pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod destructive;
pub mod error;
pub mod inspect;
pub mod logging;
pub mod platform;
pub mod report;
pub mod snapshot;
pub mod store;

pub use error::{Error, Result};
