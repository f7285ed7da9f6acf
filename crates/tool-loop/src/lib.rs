//! A tool-calling assistant that assembles the built-in tools and a model
//! provider into a ready-to-use session.
//!
//! The crate includes a CLI for use in the terminal. It can also be used as
//! a library, see [`SessionBuilder`].

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod session;
pub mod tools;

pub use config::{Config, ConfigError};
pub use session::{Session, SessionBuilder};

/// Re-exports of the [`tool_loop_core`] crate.
pub mod core {
    pub use tool_loop_core::*;
}
