pub mod analytics;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod export;
pub mod queue;
pub mod store;
pub mod web;

pub use error::{ErrorKind, QueueError, QueueResult};
pub use queue::{CheckInRequest, QueueEngine};
