//! # group
//!
//! why: own every node of the cluster and route messages between them
//! relations: owns node.rs NodeStates, reads config.rs for membership and quorum
//! what: Group routing, election driver, replication driver, status snapshot

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::{ClusterConfig, VoteBasis};
use crate::error::{Error, Result};
use crate::message::{RaftMessage, Response};
use crate::node::{NodeState, NodeStatus};
use crate::NodeId;

/// The single owner of identity-to-node lookup.
///
/// Nodes are only reached through `send` and the drivers below, which call
/// their operations; the group never touches node fields itself.
#[derive(Debug)]
pub struct Group {
    config: ClusterConfig,
    nodes: HashMap<NodeId, NodeState>,
}

impl Group {
    /// Create a fresh follower for every configured member.
    pub fn new(config: ClusterConfig) -> Result<Self> {
        check_drivable(&config)?;
        let nodes = config
            .members
            .iter()
            .map(|id| (id.clone(), NodeState::new(id.clone(), &config)))
            .collect();
        Ok(Self { config, nodes })
    }

    /// Adopt already-built nodes, one per configured member.
    pub fn with_nodes(config: ClusterConfig, nodes: Vec<NodeState>) -> Result<Self> {
        check_drivable(&config)?;
        let mut owned = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if !config.is_member(node.id()) {
                return Err(Error::InvalidConfig(format!("node {} is not a member", node.id())));
            }
            let id = node.id().to_string();
            if owned.insert(id.clone(), node).is_some() {
                return Err(Error::InvalidConfig(format!("node {id} supplied twice")));
            }
        }
        if let Some(missing) = config.members.iter().find(|m| !owned.contains_key(*m)) {
            return Err(Error::InvalidConfig(format!("member {missing} has no node")));
        }
        Ok(Self {
            config,
            nodes: owned,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn members(&self) -> &[NodeId] {
        &self.config.members
    }

    pub fn node(&self, id: &str) -> Result<&NodeState> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::UnknownNode { id: id.to_string() })
    }

    /// The node this process speaks for.
    pub fn local(&self) -> Result<&NodeState> {
        self.node(&self.config.local_id)
    }

    /// Deliver `msg` to the node owned under `to`.
    pub fn send(&self, to: &str, msg: RaftMessage) -> Result<Response> {
        let node = self.node(to)?;
        debug!(to, from = msg.sender(), kind = %msg.kind(), term = msg.term(), "routing message");
        node.handle(msg)
    }

    /// Run one election round for `candidate`.
    ///
    /// Returns whether the candidate was promoted to leader.
    pub fn run_election(&self, candidate: &str) -> Result<bool> {
        let node = self.node(candidate)?;
        let request = node.start_election();
        let term = request.term();

        let mut votes = 1;
        for peer in node.peers() {
            let response = self.send(peer, request.clone())?;
            if response.accepted && response.term == term {
                votes += 1;
            }
        }

        let quorum = self.config.quorum_size();
        if votes < quorum {
            info!(candidate, term, votes, quorum, "election lost");
            return Ok(false);
        }
        Ok(node.become_leader(term))
    }

    /// Append `value` on `leader`, returning the new entry's index.
    pub fn propose(&self, leader: &str, value: impl Into<Vec<u8>>) -> Result<u64> {
        self.node(leader)?.append(value)
    }

    /// Run one replication round from `leader` to every peer, then advance
    /// the leader's commit index. Returns that commit index.
    pub fn replicate(&self, leader: &str) -> Result<u64> {
        let node = self.node(leader)?;
        if !node.is_leader() {
            return Err(Error::NotLeader {
                node: leader.to_string(),
                leader: node.status().leader_id,
            });
        }

        for peer in node.peers() {
            self.replicate_to(node, peer)?;
        }
        Ok(node.advance_commit(self.config.quorum_size()))
    }

    // walks next_index back one step per rejection until the peer accepts
    fn replicate_to(&self, leader: &NodeState, peer: &str) -> Result<()> {
        loop {
            let Some(request) = leader.append_entries_for(peer) else {
                return Ok(());
            };
            let (prev_log_index, sent) = match &request {
                RaftMessage::AppendEntries {
                    prev_log_index,
                    entries,
                    ..
                } => (*prev_log_index, entries.len()),
                _ => return Ok(()),
            };

            let response = self.send(peer, request)?;
            leader.record_append_result(peer, prev_log_index, sent, response.accepted);
            if response.accepted || prev_log_index == 0 {
                return Ok(());
            }
        }
    }

    /// Snapshot every member, in configuration order.
    pub fn status(&self) -> Vec<NodeStatus> {
        let statuses: Vec<NodeStatus> = self
            .config
            .members
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(NodeState::status)
            .collect();
        for s in &statuses {
            info!(
                node = %s.id,
                role = ?s.role,
                term = s.current_term,
                last_index = s.last_log_index,
                committed = s.last_committed,
                "node status"
            );
        }
        statuses
    }
}

// A follower that stops at a committed conflict still acknowledges the whole
// batch, so the replication driver's match index is only sound when votes
// require a fresh log.
fn check_drivable(config: &ClusterConfig) -> Result<()> {
    config.validate()?;
    if config.vote_basis != VoteBasis::LogFreshness {
        return Err(Error::InvalidConfig(format!(
            "vote basis {:?} cannot drive elections and replication",
            config.vote_basis
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Group {
        Group::new(ClusterConfig::new("a", ["a", "b", "c"]).unwrap()).unwrap()
    }

    #[test]
    fn send_to_unknown_node_fails() {
        let group = group();
        let msg = RaftMessage::RequestVote {
            term: 1,
            candidate_id: "a".into(),
            last_log_index: 0,
            last_log_term: 0,
        };
        let err = group.send("zz", msg).unwrap_err();
        assert!(matches!(err, Error::UnknownNode { id } if id == "zz"));
    }

    #[test]
    fn send_dispatches_to_addressed_node() {
        let group = group();
        let msg = RaftMessage::RequestVote {
            term: 4,
            candidate_id: "a".into(),
            last_log_index: 0,
            last_log_term: 0,
        };
        assert_eq!(group.send("b", msg).unwrap(), Response::accept(4));
        assert_eq!(group.node("b").unwrap().current_term(), 4);
        assert_eq!(group.node("c").unwrap().current_term(), 0);
    }

    #[test]
    fn with_nodes_requires_every_member() {
        let config = ClusterConfig::new("a", ["a", "b"]).unwrap();
        let nodes = vec![NodeState::new("a", &config)];
        assert!(Group::with_nodes(config, nodes).is_err());
    }

    #[test]
    fn with_nodes_rejects_strangers() {
        let config = ClusterConfig::new("a", ["a"]).unwrap();
        let nodes = vec![NodeState::new("a", &config), NodeState::new("x", &config)];
        assert!(Group::with_nodes(config, nodes).is_err());
    }

    #[test]
    fn replicate_from_follower_is_not_leader() {
        let group = group();
        let err = group.replicate("a").unwrap_err();
        assert!(matches!(err, Error::NotLeader { .. }));
    }

    #[test]
    fn exposes_configuration() {
        let group = group();
        assert_eq!(group.members(), ["a", "b", "c"]);
        assert_eq!(group.config().local_id, "a");
        assert_eq!(group.local().unwrap().id(), "a");
    }

    #[test]
    fn commit_index_basis_is_refused() {
        let config = ClusterConfig::new("a", ["a", "b", "c"])
            .unwrap()
            .with_vote_basis(VoteBasis::CommitIndex);
        let err = Group::new(config).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn status_follows_configuration_order() {
        let ids: Vec<_> = group().status().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
