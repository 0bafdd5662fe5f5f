use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CalsyncError, Result};

/// Address book entry for one cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: u64,
    pub addr: String, // host:port format, supports both IP and hostnames
}

/// Configuration for one calendar node.
///
/// The member list covers the whole cluster, this node included; messages are
/// fanned out to every entry uniformly. Node ids must be exactly `0..N-1`:
/// proposal ids are strided by the cluster size with each node starting at its
/// own id, so the residues stay distinct only under that numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub node_id: u64,
    pub nodes: Vec<PeerConfig>,

    /// Bounded wait for each majority (promise/accept) phase.
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    /// Proposal rounds attempted per client operation before reporting failure.
    #[serde(default = "default_max_round_retries")]
    pub max_round_retries: u32,
    /// Jittered pause between failed rounds.
    #[serde(default = "default_retry_backoff_min_ms")]
    pub retry_backoff_min_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Missing-event requests sent past the log tail per catch-up pass.
    #[serde(default = "default_gap_batch_size")]
    pub gap_batch_size: u64,
    /// Pause between catch-up passes.
    #[serde(default = "default_gap_poll_interval_ms")]
    pub gap_poll_interval_ms: u64,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_round_timeout_ms() -> u64 {
    5000
}

fn default_max_round_retries() -> u32 {
    8
}

fn default_retry_backoff_min_ms() -> u64 {
    50
}

fn default_retry_backoff_max_ms() -> u64 {
    250
}

fn default_gap_batch_size() -> u64 {
    10
}

fn default_gap_poll_interval_ms() -> u64 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            nodes: Vec::new(),
            round_timeout_ms: default_round_timeout_ms(),
            max_round_retries: default_max_round_retries(),
            retry_backoff_min_ms: default_retry_backoff_min_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            gap_batch_size: default_gap_batch_size(),
            gap_poll_interval_ms: default_gap_poll_interval_ms(),
            data_dir: default_data_dir(),
        }
    }
}

impl ClusterConfig {
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node_id: u64, addr: String) -> Self {
        self.nodes.push(PeerConfig { node_id, addr });
        self
    }

    /// Load the shared cluster file (JSON). The local node id and data
    /// directory are process-level choices and come from the command line.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Fail fast on any numbering that would break proposal-id uniqueness.
    pub fn validate(&self) -> Result<()> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(CalsyncError::Config("member list is empty".to_string()));
        }
        let mut seen = vec![false; n];
        for peer in &self.nodes {
            let id = peer.node_id as usize;
            if id >= n {
                return Err(CalsyncError::Config(format!(
                    "node id {} out of range for a {}-node cluster (ids must be 0..{})",
                    peer.node_id,
                    n,
                    n - 1
                )));
            }
            if seen[id] {
                return Err(CalsyncError::Config(format!(
                    "duplicate node id {} in member list",
                    peer.node_id
                )));
            }
            seen[id] = true;
        }
        if self.node_id as usize >= n {
            return Err(CalsyncError::Config(format!(
                "local node id {} is not a cluster member",
                self.node_id
            )));
        }
        if self.retry_backoff_min_ms > self.retry_backoff_max_ms {
            return Err(CalsyncError::Config(
                "retry_backoff_min_ms exceeds retry_backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Minimum agreeing set: ⌊N/2⌋ + 1.
    pub fn majority(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    pub fn addr_of(&self, node_id: u64) -> Option<&str> {
        self.nodes
            .iter()
            .find(|p| p.node_id == node_id)
            .map(|p| p.addr.as_str())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let addr = self.addr_of(self.node_id).ok_or_else(|| {
            CalsyncError::Config(format!("no address configured for node {}", self.node_id))
        })?;
        addr.parse().map_err(|_| {
            CalsyncError::Config(format!("cannot parse listen address {:?}", addr))
        })
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn gap_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gap_poll_interval_ms)
    }
}
