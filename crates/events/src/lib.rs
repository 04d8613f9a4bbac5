//! PlanBridge progress bus.
//!
//! - [`ProgressBus`]: in-process, topic-scoped publish/subscribe hub
//!   backed by `tokio::sync::broadcast`.
//! - [`ProgressEvent`]: the live job update envelope.
//! - [`Subscription`]: RAII subscription handle.

pub mod bus;

pub use bus::{ProgressBus, ProgressEvent, Subscription};
