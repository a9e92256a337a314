//! Client side: stream reader, replay buffers and the task follower.
//!
//! ```text
//! LogServiceClient ──resolve──► StreamReader ──events──► ReplayBuffer ──► subscribers
//! ```

pub mod api;
pub mod backoff;
pub mod buffer;
pub mod decoder;
pub mod follow;
pub mod reader;
pub mod registry;

pub use api::LogServiceClient;
pub use backoff::Backoff;
pub use buffer::{BufferKey, EventKind, LogEvent, ReplayBuffer, Subscription};
pub use decoder::{Frame, StreamDecoder};
pub use follow::{FollowOutcome, TaskLogFollower};
pub use reader::{StreamExit, StreamHandle, StreamReader};
pub use registry::BufferRegistry;
