use serde::Serialize;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::blockchain::{DEFAULT_CHAIN_WINDOW, DEFAULT_DIFFICULTY};
use crate::error::ConsensusError;
use crate::transaction::NodeId;

/// Which consensus driver the cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    Pow,
    Raft,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mechanism::Pow => f.write_str("pow"),
            Mechanism::Raft => f.write_str("raft"),
        }
    }
}

impl FromStr for Mechanism {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pow" | "proof-of-work" => Ok(Mechanism::Pow),
            "raft" => Ok(Mechanism::Raft),
            other => Err(ConsensusError::Config(format!(
                "unknown consensus mechanism '{other}'"
            ))),
        }
    }
}

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub mechanism: Mechanism,
    /// Each node stops once it has appended this many blocks.
    pub total_blocks: u64,
    /// Number of nodes in the cluster, including this one.
    pub network_size: usize,
    /// Upper bound of the randomized election timeout.
    pub election_timeout: Duration,
    /// Identifier of the first local node; the others are numbered consecutively.
    pub node_id: NodeId,
    pub difficulty: usize,
    pub chain_window: usize,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mechanism: Mechanism::Pow,
            total_blocks: 100,
            network_size: 3,
            election_timeout: Duration::from_millis(1000),
            node_id: 1,
            difficulty: DEFAULT_DIFFICULTY,
            chain_window: DEFAULT_CHAIN_WINDOW,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConsensusError> {
        let defaults = Config::default();

        let mechanism = match env::var("CONSENSUS") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.mechanism,
        };
        let network_size: usize = parse_var("NETWORK_SIZE", defaults.network_size)?;
        if network_size == 0 {
            return Err(ConsensusError::Config("NETWORK_SIZE must be > 0".into()));
        }
        let election_timeout_ms: u64 = parse_var(
            "ELECTION_TIMEOUT_MS",
            defaults.election_timeout.as_millis() as u64,
        )?;
        if election_timeout_ms < 4 {
            return Err(ConsensusError::Config(
                "ELECTION_TIMEOUT_MS must be >= 4".into(),
            ));
        }

        let config = Self {
            mechanism,
            total_blocks: parse_var("TOTAL_BLOCKS", defaults.total_blocks)?,
            network_size,
            election_timeout: Duration::from_millis(election_timeout_ms),
            node_id: parse_var("NODE_ID", defaults.node_id)?,
            difficulty: parse_var("DIFFICULTY", defaults.difficulty)?,
            chain_window: parse_var("CHAIN_WINDOW", defaults.chain_window)?,
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
        };
        config.node_ids()?;
        Ok(config)
    }

    /// Ids of every node in the local cluster. Fails when the range does not fit in a `NodeId`.
    pub fn node_ids(&self) -> Result<Vec<NodeId>, ConsensusError> {
        let out_of_range = || {
            ConsensusError::Config(format!(
                "NODE_ID {} with NETWORK_SIZE {} overflows node ids",
                self.node_id, self.network_size
            ))
        };
        let size = NodeId::try_from(self.network_size).map_err(|_| out_of_range())?;
        if size > 0 {
            self.node_id.checked_add(size - 1).ok_or_else(out_of_range)?;
        }
        Ok((0..size).map(|offset| self.node_id + offset).collect())
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConsensusError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConsensusError::Config(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(default),
    }
}
