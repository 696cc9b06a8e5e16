//! # config
//!
//! why: describe cluster membership supplied by the external configuration source
//! relations: consumed by group.rs for routing and quorum arithmetic, by node.rs for vote policy
//! what: ClusterConfig, VoteBasis, json loading and validation

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::NodeId;

/// How a voter decides whether a candidate's log is fresh enough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteBasis {
    /// Compare `(last_log_term, last_log_index)` against the voter's last entry.
    #[default]
    LogFreshness,
    /// Compare the candidate's `last_log_index` against the voter's commit index.
    CommitIndex,
}

/// Cluster membership and the identity of the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Identity of the node this process speaks for
    pub local_id: NodeId,
    /// Every voting member, the local node included
    pub members: Vec<NodeId>,
    #[serde(default)]
    pub vote_basis: VoteBasis,
}

impl ClusterConfig {
    /// Build and validate a configuration with the default vote basis.
    pub fn new<I, S>(local_id: impl Into<NodeId>, members: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        let config = Self {
            local_id: local_id.into(),
            members: members.into_iter().map(Into::into).collect(),
            vote_basis: VoteBasis::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_vote_basis(mut self, vote_basis: VoteBasis) -> Self {
        self.vote_basis = vote_basis;
        self
    }

    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(Error::InvalidConfig("cluster has no members".into()));
        }
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member.as_str()) {
                return Err(Error::InvalidConfig(format!("duplicate member {member}")));
            }
        }
        if !seen.contains(self.local_id.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "local node {} is not a member",
                self.local_id
            )));
        }
        Ok(())
    }

    /// Strict majority of the configured membership.
    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Every member except `id`.
    pub fn peers_of(&self, id: &str) -> Vec<NodeId> {
        self.members.iter().filter(|m| *m != id).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_strict_majority() {
        let sizes = [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (7, 4)];
        for (n, quorum) in sizes {
            let members: Vec<String> = (0..n).map(|i| format!("n{i}")).collect();
            let config = ClusterConfig::new("n0", members).unwrap();
            assert_eq!(config.quorum_size(), quorum, "cluster of {n}");
        }
    }

    #[test]
    fn rejects_empty_membership() {
        let err = ClusterConfig::new("a", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn rejects_duplicate_members() {
        assert!(ClusterConfig::new("a", ["a", "b", "a"]).is_err());
    }

    #[test]
    fn rejects_local_outside_membership() {
        assert!(ClusterConfig::new("z", ["a", "b", "c"]).is_err());
    }

    #[test]
    fn loads_from_json_with_default_basis() {
        let json = r#"{"local_id":"a","members":["a","b","c"]}"#;
        let config = ClusterConfig::from_json(json).unwrap();
        assert_eq!(config.vote_basis, VoteBasis::LogFreshness);
        assert_eq!(config.peers_of("a"), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn loads_commit_index_basis_from_json() {
        let json = r#"{"local_id":"a","members":["a"],"vote_basis":"commit_index"}"#;
        let config = ClusterConfig::from_json(json).unwrap();
        assert_eq!(config.vote_basis, VoteBasis::CommitIndex);
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = ClusterConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
