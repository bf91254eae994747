//! # ucp-core
//!
//! Shared building blocks for the UCP directory crates.
//!
//! ## Modules
//!
//! - [`error`] - Error type and LDAP result code mapping
//! - [`credentials`] - Administrative bind credentials
//! - [`password`] - Random password generation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod credentials;
pub mod error;
pub mod password;

// Re-export commonly used types
pub use credentials::BindCredentials;
pub use error::{Error, Result};
pub use password::{generate_password, DEFAULT_PASSWORD_LENGTH};
