//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the auth crates:
//! - Logging and tracing setup
//! - Event bus for session lifecycle notifications

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
