//! mview Common Types and Utilities
//!
//! Shared error taxonomy, configuration and declarative entity types used by
//! the REST layer and the server binary.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::MviewConfig;
pub use error::{Error, Result};
