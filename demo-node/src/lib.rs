//! Library surface behind the `demo-node` CLI (C12): the node facade, local
//! admin commands, wire-client commands, config loading, and PID-file
//! bookkeeping, split out of `main.rs` so integration tests can drive them
//! directly instead of shelling out to the binary.
//!
//! Grounded on `wizardsardine-liana/lianad`'s `lib.rs`/`main.rs` split,
//! where the binary is a thin CLI shim over a fully public library crate.

pub mod admin;
pub mod config;
pub mod error;
pub mod node;
pub mod pidfile;
pub mod remote;
