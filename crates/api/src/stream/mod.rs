//! Live stream gateway: job progress pushed to HTTP clients.

pub mod gateway;
pub mod sse;

pub use gateway::{Frame, SessionEnd, StreamGateway, StreamSession};
