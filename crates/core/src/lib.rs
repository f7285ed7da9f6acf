//! Core logic of the tool-calling loop: conversations, the tool registry,
//! the model client with retries, and the dispatcher that ties them
//! together.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod conversation;
mod dispatch;
mod model_client;
pub mod observer;
pub mod tool;

pub use conversation::Conversation;
pub use dispatch::{DispatchConfig, DispatchError, Dispatcher, FinalAnswer};
pub use model_client::{ModelClient, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
