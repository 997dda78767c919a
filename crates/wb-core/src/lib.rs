//! Shared foundations for the workbench server.
//!
//! - [`config`]: TOML configuration with env overrides
//! - [`shutdown`]: process-wide shutdown signal and drain guards
//! - [`workspace`]: project directories, scoped file access, and the
//!   [`workspace::ProjectResolver`] used to pick a command's working directory

pub mod config;
pub mod shutdown;
pub mod workspace;
