//! # ramvm Common
//!
//! Shared utilities for the ramvm crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use ramvm_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(vm_id = 200, "Cloning template");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
