//! Process lifecycle management for remotely issued shell commands.
//!
//! The pieces, bottom-up:
//!
//! - [`launcher::CommandLauncher`] spawns a command under the configured
//!   shell and hands back a [`launcher::ProcessHandle`].
//! - [`registry::ExecutionRegistry`] maps execution ids to live handles.
//! - [`supervisor::ExecutionSupervisor`] owns the registry and enforces the
//!   timeout, stop and shutdown teardown paths.
//! - [`reporter::Reporter`] is the read-only view the HTTP layer consumes.

pub mod error;
pub mod history;
pub mod launcher;
pub mod output;
pub mod registry;
pub mod reporter;
pub mod supervisor;
pub mod types;

pub use error::LaunchError;
pub use launcher::{CommandLauncher, ProcessHandle};
pub use registry::ExecutionRegistry;
pub use reporter::Reporter;
pub use supervisor::ExecutionSupervisor;
pub use types::{
    ExecutionRecord, ExecutionSnapshot, ExecutionStatus, ExecutionSummary, ExitState, OutputChunk,
    OutputStream, StopOutcome, TeardownReason,
};
