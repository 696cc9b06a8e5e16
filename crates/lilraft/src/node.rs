//! # node
//!
//! why: define the per-node raft state machine and its safety rules
//! relations: uses message.rs for rpc types, log.rs for entry storage, driven by group.rs
//! what: Role enum, NodeState with append/vote handlers, leader bookkeeping

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, VoteBasis};
use crate::error::{Error, Result};
use crate::log::{LogEntry, RaftLog};
use crate::message::{RaftMessage, Response};
use crate::NodeId;

/// The three possible roles a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// Passive state - accepts entries from a leader, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - accepts writes and drives replication
    Leader,
}

/// State recovered by the external persistence layer after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub entries: Vec<LogEntry>,
    pub last_committed: u64,
    #[serde(default)]
    pub last_applied: u64,
}

/// Point-in-time copy of a node's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub role: Role,
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub last_log_index: u64,
    pub last_log_term: u64,
    pub last_committed: u64,
    pub last_applied: u64,
    pub next_index: BTreeMap<NodeId, u64>,
    pub match_index: BTreeMap<NodeId, u64>,
}

#[derive(Debug, Default)]
struct State {
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: RaftLog,
    last_committed: u64,
    last_applied: u64,
    // leader only, rebuilt on every promotion
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,
}

impl State {
    fn adopt_term(&mut self, term: u64) {
        debug_assert!(term > self.current_term);
        self.current_term = term;
        self.voted_for = None;
        self.leader_id = None;
        self.step_down();
    }

    fn step_down(&mut self) {
        self.role = Role::Follower;
        self.next_index.clear();
        self.match_index.clear();
    }
}

/// A single Raft participant.
///
/// Every operation takes the node's own lock for its whole duration, so
/// operations on one node are serialized while different nodes never contend.
#[derive(Debug)]
pub struct NodeState {
    id: NodeId,
    peers: Vec<NodeId>,
    vote_basis: VoteBasis,
    state: Mutex<State>,
}

impl NodeState {
    /// Create a fresh follower at term 0 with an empty log.
    pub fn new(id: impl Into<NodeId>, config: &ClusterConfig) -> Self {
        let id = id.into();
        Self {
            peers: config.peers_of(&id),
            vote_basis: config.vote_basis,
            state: Mutex::new(State::default()),
            id,
        }
    }

    /// Rebuild a follower from recovered state, checking the log invariants.
    pub fn restore(
        id: impl Into<NodeId>,
        config: &ClusterConfig,
        persisted: PersistentState,
    ) -> Result<Self> {
        let id = id.into();
        let log = RaftLog::from_entries(persisted.entries).map_err(Error::CorruptState)?;
        if persisted.last_committed > log.last_index() {
            return Err(Error::CorruptState(format!(
                "last committed {} beyond last index {}",
                persisted.last_committed,
                log.last_index()
            )));
        }
        if persisted.last_applied > persisted.last_committed {
            return Err(Error::CorruptState(format!(
                "last applied {} beyond last committed {}",
                persisted.last_applied, persisted.last_committed
            )));
        }

        let state = State {
            current_term: persisted.current_term,
            voted_for: persisted.voted_for,
            log,
            last_committed: persisted.last_committed,
            last_applied: persisted.last_applied,
            ..State::default()
        };
        Ok(Self {
            peers: config.peers_of(&id),
            vote_basis: config.vote_basis,
            state: Mutex::new(state),
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.state.lock().current_term
    }

    /// Highest index applied to the local state machine.
    pub fn version(&self) -> u64 {
        self.state.lock().last_applied
    }

    pub fn entry(&self, index: u64) -> Option<LogEntry> {
        self.state.lock().log.get(index).cloned()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().log.iter().cloned().collect()
    }

    pub fn status(&self) -> NodeStatus {
        let st = self.state.lock();
        NodeStatus {
            id: self.id.clone(),
            role: st.role,
            current_term: st.current_term,
            voted_for: st.voted_for.clone(),
            leader_id: st.leader_id.clone(),
            last_log_index: st.log.last_index(),
            last_log_term: st.log.last_term(),
            last_committed: st.last_committed,
            last_applied: st.last_applied,
            next_index: st.next_index.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            match_index: st.match_index.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Dispatch an inbound request under the node lock.
    ///
    /// Response variants cannot be handled by a node and fail with
    /// `InvalidMessageKind` without touching state.
    pub fn handle(&self, msg: RaftMessage) -> Result<Response> {
        let mut st = self.state.lock();
        match msg {
            RaftMessage::AppendEntries {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_last_committed,
            } => Ok(self.append_entries(
                &mut st,
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_last_committed,
            )),
            RaftMessage::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => Ok(self.request_vote(&mut st, term, candidate_id, last_log_index, last_log_term)),
            other => {
                let kind = other.kind();
                warn!(node = %self.id, %kind, from = other.sender(), "refusing undispatchable message");
                Err(Error::InvalidMessageKind { kind })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn append_entries(
        &self,
        st: &mut State,
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_last_committed: u64,
    ) -> Response {
        if term < st.current_term {
            debug!(node = %self.id, term, current = st.current_term, leader = %leader_id, "rejecting stale append entries");
            return Response::reject();
        }

        if !st.log.matches(prev_log_index, prev_log_term) {
            debug!(node = %self.id, prev_log_index, prev_log_term, "rejecting append entries, log mismatch");
            return Response::reject();
        }

        if term > st.current_term {
            info!(node = %self.id, term, previous = st.current_term, "adopting leader term");
            st.adopt_term(term);
        }
        if st.role != Role::Follower {
            info!(node = %self.id, term, role = ?st.role, leader = %leader_id, "stepping down to follower");
            st.step_down();
        }
        st.leader_id = Some(leader_id);

        let mut accepted = Vec::with_capacity(entries.len());
        let mut expected = prev_log_index + 1;
        for entry in entries {
            if entry.index != expected {
                debug!(node = %self.id, index = entry.index, expected, "batch not contiguous, discarding rest");
                break;
            }
            if let Some(local_term) = st.log.term_at(entry.index) {
                if local_term != entry.term {
                    if entry.index <= st.last_committed {
                        warn!(
                            node = %self.id,
                            index = entry.index,
                            local_term,
                            incoming_term = entry.term,
                            "conflicting write at committed index, discarding rest of batch"
                        );
                        break;
                    }
                    let dropped = st.log.truncate_from(entry.index);
                    debug!(node = %self.id, index = entry.index, dropped, "truncated conflicting suffix");
                }
            }
            expected += 1;
            accepted.push(entry);
        }

        let Some(last_accepted) = accepted.last().map(|e| e.index) else {
            debug!(node = %self.id, term = st.current_term, "acknowledged append entries with nothing new");
            return Response::accept(st.current_term);
        };

        for entry in accepted {
            st.log.insert(entry);
        }

        if st.last_committed < leader_last_committed {
            let target = leader_last_committed.min(last_accepted);
            if target > st.last_committed {
                info!(node = %self.id, from = st.last_committed, to = target, "advancing commit index");
                st.last_committed = target;
            }
        }

        Response::accept(st.current_term)
    }

    fn request_vote(
        &self,
        st: &mut State,
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    ) -> Response {
        if term < st.current_term {
            debug!(node = %self.id, term, current = st.current_term, candidate = %candidate_id, "rejecting stale vote request");
            return Response::reject();
        }

        if term > st.current_term {
            info!(node = %self.id, term, previous = st.current_term, "adopting candidate term");
            st.adopt_term(term);
        }

        let can_vote = st
            .voted_for
            .as_deref()
            .map_or(true, |voted| voted == candidate_id);
        let up_to_date = match self.vote_basis {
            VoteBasis::LogFreshness => st.log.is_up_to_date(last_log_term, last_log_index),
            VoteBasis::CommitIndex => last_log_index >= st.last_committed,
        };

        if can_vote && up_to_date {
            info!(node = %self.id, term, candidate = %candidate_id, "granting vote");
            st.voted_for = Some(candidate_id);
            Response::accept(st.current_term)
        } else {
            debug!(
                node = %self.id,
                term,
                candidate = %candidate_id,
                voted_for = ?st.voted_for,
                up_to_date,
                "withholding vote"
            );
            Response::reject()
        }
    }

    /// Append a value to the leader's log, returning its index.
    pub fn append(&self, value: impl Into<Vec<u8>>) -> Result<u64> {
        let mut st = self.state.lock();
        if st.role != Role::Leader {
            return Err(Error::NotLeader {
                node: self.id.clone(),
                leader: st.leader_id.clone(),
            });
        }
        let index = st.log.last_index() + 1;
        let term = st.current_term;
        st.log.insert(LogEntry::new(term, index, value));
        debug!(node = %self.id, term, index, "appended local entry");
        Ok(index)
    }

    /// Become a candidate for the next term, voting for self.
    ///
    /// Returns the vote request to broadcast to every peer.
    pub fn start_election(&self) -> RaftMessage {
        let mut st = self.state.lock();
        let term = st.current_term + 1;
        st.adopt_term(term);
        st.role = Role::Candidate;
        st.voted_for = Some(self.id.clone());
        info!(node = %self.id, term, "starting election");

        RaftMessage::RequestVote {
            term,
            candidate_id: self.id.clone(),
            last_log_index: st.log.last_index(),
            last_log_term: st.log.last_term(),
        }
    }

    /// Promote to leader if still campaigning in `term`.
    pub fn become_leader(&self, term: u64) -> bool {
        let mut st = self.state.lock();
        if st.role != Role::Candidate || st.current_term != term {
            debug!(node = %self.id, term, current = st.current_term, role = ?st.role, "promotion no longer valid");
            return false;
        }

        st.role = Role::Leader;
        st.leader_id = Some(self.id.clone());
        let next = st.log.last_index() + 1;
        st.next_index = self.peers.iter().map(|p| (p.clone(), next)).collect();
        st.match_index = self.peers.iter().map(|p| (p.clone(), 0)).collect();
        info!(node = %self.id, term, "became leader");
        true
    }

    /// Build the AppendEntries request for `peer` from its replication cursor.
    ///
    /// `None` when this node is not leader or `peer` is not tracked.
    pub fn append_entries_for(&self, peer: &str) -> Option<RaftMessage> {
        let st = self.state.lock();
        if st.role != Role::Leader {
            return None;
        }
        let next = *st.next_index.get(peer)?;
        let prev_log_index = next - 1;

        Some(RaftMessage::AppendEntries {
            term: st.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term: st.log.term_at(prev_log_index).unwrap_or(0),
            entries: st.log.entries_from(next),
            leader_last_committed: st.last_committed,
        })
    }

    /// Fold a peer's AppendEntries outcome into the replication cursors.
    ///
    /// Returns the peer's next index afterwards.
    pub fn record_append_result(
        &self,
        peer: &str,
        prev_log_index: u64,
        sent: usize,
        accepted: bool,
    ) -> u64 {
        let mut st = self.state.lock();
        if st.role != Role::Leader {
            return 0;
        }
        let Some(next) = st.next_index.get(peer).copied() else {
            return 0;
        };

        let next = if accepted {
            let matched = prev_log_index + sent as u64;
            let entry = st.match_index.entry(peer.to_string()).or_insert(0);
            *entry = (*entry).max(matched);
            *entry + 1
        } else {
            next.saturating_sub(1).max(1)
        };
        st.next_index.insert(peer.to_string(), next);
        debug!(node = %self.id, peer, next, accepted, "updated replication cursor");
        next
    }

    /// Raise the commit index to the highest entry of the current term held
    /// by `quorum` members, the leader included.
    pub fn advance_commit(&self, quorum: usize) -> u64 {
        let mut st = self.state.lock();
        if st.role != Role::Leader {
            return st.last_committed;
        }

        let mut matched: Vec<u64> = st.match_index.values().copied().collect();
        matched.push(st.log.last_index());
        if quorum == 0 || quorum > matched.len() {
            return st.last_committed;
        }
        matched.sort_unstable_by(|a, b| b.cmp(a));

        let candidate = matched[quorum - 1];
        // entries from earlier terms commit only behind one of the current term
        if candidate > st.last_committed && st.log.term_at(candidate) == Some(st.current_term) {
            info!(node = %self.id, from = st.last_committed, to = candidate, "advancing commit index");
            st.last_committed = candidate;
        }
        st.last_committed
    }

    /// Hand out committed entries not yet applied, advancing the apply cursor.
    pub fn apply_committed(&self) -> Vec<LogEntry> {
        let mut st = self.state.lock();
        let entries = st.log.entries_between(st.last_applied, st.last_committed);
        st.last_applied = st.last_committed;
        entries
    }
}
