//! Composition root for the workbench server: wires configuration, the
//! project workspace, the execution supervisor and the HTTP API together,
//! and owns the shutdown sequence.

pub mod daemon;
