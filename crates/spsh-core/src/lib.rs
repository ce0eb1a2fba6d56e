//! SPSH Core Library
//!
//! Configuration, errors and the domain types shared between the directory
//! client and its callers.

pub mod config;
pub mod error;
pub mod types;

pub use config::SpshConfig;
pub use error::{Error, Result};

/// SPSH version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retries applied when neither the caller nor the configuration sets a bound
pub const DEFAULT_RETRIES: u32 = 3;

/// Default email domain of public schools
pub const DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN: &str = "schule-sh.de";

/// Default email domain of substitute (private) schools
pub const DEFAULT_ERSATZSCHULEN_DOMAIN: &str = "ersatzschule-sh.de";

/// Default directory base DN
pub const DEFAULT_BASE_DN: &str = "dc=schule-sh,dc=de";
