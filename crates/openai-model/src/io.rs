mod chunks;
mod sse;

pub use chunks::Chunks;
pub use sse::{Error as SseError, Sse};
