//! Shared foundations for the Chakra media relay: configuration, logging and
//! the error taxonomy every other crate reports through.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, HostPolicy};
pub use error::{Error, Result};
