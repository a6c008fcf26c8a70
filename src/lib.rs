//! Estate workspace lifecycle and a self-healing OpenTofu apply runner.
//!
//! An estate is a git repository of OpenTofu configuration. Commands sync a
//! cached mirror of it, copy the mirror into a throwaway workspace, resolve the
//! remote-state backend and credentials, and run the tool there. Apply
//! failures that match known patterns are remediated and retried once.
pub mod backend;
pub mod cache;
pub mod config;
pub mod estate;
pub mod execution;
pub mod gitutils;
pub mod inventory;
pub mod persistence;
pub mod prompt;
pub mod recovery;
pub mod tofu;
pub mod workspace;

#[cfg(test)]
mod test_support;
