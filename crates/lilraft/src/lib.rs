//! # lilraft
//!
//! why: the safety core of one raft participant, deciding whether to accept a
//!      leader's replication request or grant a candidate's vote
//! relations: transport, timers and durable storage are external; they feed
//!            messages into a `Group` and read back `Response`s
//! what: log entries, message types, per-node state machine, group routing
//!       with election and replication drivers

pub mod config;
pub mod error;
pub mod group;
pub mod log;
pub mod message;
pub mod node;

pub use config::{ClusterConfig, VoteBasis};
pub use error::{Error, Result};
pub use group::Group;
pub use log::{LogEntry, RaftLog};
pub use message::{MessageKind, RaftMessage, Response};
pub use node::{NodeState, NodeStatus, PersistentState, Role};

/// Stable identity of a cluster member.
pub type NodeId = String;
