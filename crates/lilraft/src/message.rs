//! # message
//!
//! why: define the raft rpc shapes exchanged between nodes
//! relations: dispatched by node.rs, routed by group.rs, serialized by the external transport
//! what: RaftMessage enum, MessageKind tag, Response outcome

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::NodeId;

/// All raft messages a transport may carry between nodes.
///
/// Only `AppendEntries` and `RequestVote` are requests a node handles; the
/// response variants travel back to the driver and are refused by
/// `NodeState::handle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Replicate log entries (also serves as heartbeat when entries is empty)
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_last_committed: u64,
    },
    /// Request a vote during leader election
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },
    /// Reply to AppendEntries
    AppendEntriesResponse {
        term: u64,
        from: NodeId,
        success: bool,
    },
    /// Reply to RequestVote
    VoteResponse {
        term: u64,
        from: NodeId,
        vote_granted: bool,
    },
}

impl RaftMessage {
    /// Sender's term, whatever the variant.
    pub fn term(&self) -> u64 {
        match self {
            Self::AppendEntries { term, .. }
            | Self::RequestVote { term, .. }
            | Self::AppendEntriesResponse { term, .. }
            | Self::VoteResponse { term, .. } => *term,
        }
    }

    /// Sender's identity, whatever the variant.
    pub fn sender(&self) -> &str {
        match self {
            Self::AppendEntries { leader_id, .. } => leader_id,
            Self::RequestVote { candidate_id, .. } => candidate_id,
            Self::AppendEntriesResponse { from, .. } | Self::VoteResponse { from, .. } => from,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AppendEntries { .. } => MessageKind::AppendEntries,
            Self::RequestVote { .. } => MessageKind::RequestVote,
            Self::AppendEntriesResponse { .. } => MessageKind::AppendEntriesResponse,
            Self::VoteResponse { .. } => MessageKind::VoteResponse,
        }
    }

    /// Packages a handler outcome as the reply a transport sends back.
    pub fn reply_to(
        request: &RaftMessage,
        from: impl Into<NodeId>,
        response: Response,
    ) -> Option<Self> {
        let from = from.into();
        match request {
            Self::AppendEntries { .. } => Some(Self::AppendEntriesResponse {
                term: response.term,
                from,
                success: response.accepted,
            }),
            Self::RequestVote { .. } => Some(Self::VoteResponse {
                term: response.term,
                from,
                vote_granted: response.accepted,
            }),
            _ => None,
        }
    }
}

/// Variant tag of a `RaftMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    AppendEntries,
    RequestVote,
    AppendEntriesResponse,
    VoteResponse,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AppendEntries => "AppendEntries",
            Self::RequestVote => "RequestVote",
            Self::AppendEntriesResponse => "AppendEntriesResponse",
            Self::VoteResponse => "VoteResponse",
        };
        f.write_str(name)
    }
}

/// Outcome of handling a request: the responder's term and whether it accepted.
///
/// Rejections carry term 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub term: u64,
    pub accepted: bool,
}

impl Response {
    pub fn accept(term: u64) -> Self {
        Self {
            term,
            accepted: true,
        }
    }

    pub fn reject() -> Self {
        Self {
            term: 0,
            accepted: false,
        }
    }
}
