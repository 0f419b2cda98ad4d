//! OpenSIPS Management Interface
//!
//! This crate provides the pieces needed to talk to an OpenSIPS instance over
//! its `mi_json` module:
//!
//! - [`node`] - The MI tree model (`Node`) and the decoder for the loosely typed
//!   JSON trees OpenSIPS returns
//! - [`client`] - The [`CommandExecutor`] trait and its HTTP implementation
//!   [`MiJsonClient`]
//! - [`error`] - Error types

pub mod client;
pub mod error;
pub mod node;

// Re-export commonly used types at the crate root
pub use client::{CommandExecutor, DEFAULT_TIMEOUT, MiJsonClient};
pub use error::{DecodeError, MiError, Result};
pub use node::{Node, decode};
