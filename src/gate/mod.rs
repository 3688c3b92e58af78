//! Policy-gated remote benchmark execution.
//!
//! This module is organized into the following submodules:
//!
//! - `command`: Tokenized view of a candidate shell command
//! - `policy`: Ordered safety rules and the validator
//! - `auth`: Credential resolution and first-success-wins authentication
//! - `session`: Remote session traits and the russh client handler
//! - `client`: SSH connection and command execution over russh
//! - `persist`: Writing result bundles to the remote filesystem
//! - `audit`: Audit events and the audit log sink
//! - `storage`: Registry of in-flight runs
//! - `coordinator`: The validate/connect/execute/persist pipeline
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Pipeline error taxonomy
//! - `types`: Serializable request and response types
//! - `http`: poem endpoints
//! - `commands`: MCP tool implementations

pub mod audit;
pub mod auth;
pub(crate) mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod persist;
pub mod policy;
pub mod session;
pub mod storage;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use commands::FioGateCommands;
pub use coordinator::ExecutionCoordinator;
