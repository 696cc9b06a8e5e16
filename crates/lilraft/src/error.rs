//! # error
//!
//! why: structural failures that callers must handle, kept apart from protocol rejections
//! relations: returned by node.rs, group.rs and config.rs
//! what: Error enum, crate Result alias

use thiserror::Error;

use crate::message::MessageKind;
use crate::NodeId;

/// Errors raised by the consensus core.
///
/// A rejected AppendEntries or RequestVote is not an error; it comes back as
/// `Response { accepted: false, .. }`.
#[derive(Error, Debug)]
pub enum Error {
    /// The node was handed a message it cannot dispatch.
    #[error("invalid message kind: {kind}")]
    InvalidMessageKind {
        /// Kind of the rejected message
        kind: MessageKind,
    },

    /// The group does not own a node with this identity.
    #[error("unknown node: {id}")]
    UnknownNode {
        /// Identity that failed to resolve
        id: NodeId,
    },

    /// A leader-only operation was invoked on a non-leader.
    #[error("node {node} is not leader (known leader: {leader:?})")]
    NotLeader {
        /// Node the call was made on
        node: NodeId,
        /// Last leader this node heard from, if any
        leader: Option<NodeId>,
    },

    /// Cluster configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Recovered state violates a log invariant.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    /// Configuration could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
