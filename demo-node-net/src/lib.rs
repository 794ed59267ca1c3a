//! Peer set and gossip wire protocol (C10, C11).
//!
//! Grounded on `original_source/lib/net/nodesnetwork.go` (peer set) and
//! `original_source/node/nodeserver.go` / `nodeserver_handle.go` (gossip
//! server, command dispatch), generalized from blocking Go networking to
//! `tokio`.

pub mod client;
pub mod messages;
pub mod peers;
pub mod server;
pub mod wire;

pub use peers::{PeerError, PeerSet};
pub use server::{GossipConfig, HandlerError, NodeContext};
pub use wire::{Command, Frame, ProtocolError};
