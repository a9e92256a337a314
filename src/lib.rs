//! Headless task log streaming
//!
//! Serves the console output of long-running headless workspace tasks
//! (prebuilds), live from the workspace supervisor while the instance runs and
//! from archived storage once it stopped, and reads it back reliably on the
//! client side.
//!
//! ## Module Structure
//!
//! Server side:
//! - `resolver`: decides live vs. archived and renders one URL per task
//! - `retry`: retry loop bounded by a continuation predicate
//! - `server`: axum endpoints for resolution, live forwarding and archived downloads
//! - `supervisor`, `archive`, `instance_store`: collaborator adapters
//!
//! Client side:
//! - `client`: stream reader, replay buffers, resolve client and task follower
//!
//! Shared:
//! - `protocol`: in-band end-of-stream markers and the resolve DTOs
//! - `model`, `error`, `config`

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod instance_store;
pub mod model;
pub mod protocol;
pub mod resolver;
pub mod retry;
pub mod server;
pub mod supervisor;

pub use archive::{ArchiveKey, ArchivedLogStore, HttpArchiveClient, MemoryArchive};
pub use client::{
    BufferKey, BufferRegistry, EventKind, FollowOutcome, LogEvent, LogServiceClient,
    ReplayBuffer, StreamExit, StreamHandle, StreamReader, TaskLogFollower,
};
pub use config::{LogServiceConfig, ReaderConfig};
pub use error::{
    ArchiveError, LogStreamError, ResolveError, StoreError, SupervisorError,
};
pub use instance_store::{InstanceStore, MemoryInstanceStore, SqliteInstanceStore};
pub use model::{InstancePhase, SupervisorEndpoint, TaskState, TaskStatus, WorkspaceInstance};
pub use protocol::{HeadlessLogUrls, LogStreamEndpoint};
pub use resolver::{HeadlessLogResolver, LiveStreamSummary};
pub use retry::{AlwaysContinue, ContinuationPredicate, ContinueWhileRunning, RetryError, RetryHarness};
pub use server::LogServer;
pub use supervisor::{HttpSupervisorClient, SupervisorApi};
