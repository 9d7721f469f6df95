//! Configuration management for the header downloader.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Network whose hard-coded tips are loaded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ConfigError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Configuration for the header downloader.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Network to load hard-coded tips for.
    pub network: Network,

    /// Maximum number of tips held in memory that are not yet persisted.
    /// Segments that would exceed it are dropped.
    pub tip_limit: usize,

    /// Maximum number of persisted tips kept in the in-memory index.
    pub persisted_tip_limit: usize,

    /// Maximum number of anchors.
    pub anchor_limit: usize,

    /// Number of unanswered requests after which an anchor is abandoned.
    pub max_timeouts: u32,

    /// How long to wait before re-requesting the same anchor.
    pub request_timeout: Duration,

    /// Number of headers asked for in one backward request.
    pub request_length: u64,

    /// Distance between headers of a skeleton request.
    pub skeleton_stride: u64,

    /// Skeleton requests are only issued while the anchor count is at most this.
    pub skeleton_anchor_threshold: usize,

    /// Period of the request loop.
    pub request_interval: Duration,

    /// Period of the insert loop.
    pub insert_interval: Duration,

    /// Prefix used in log lines, usually the stage name.
    pub log_prefix: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            tip_limit: 50_000,
            persisted_tip_limit: 1024,
            anchor_limit: 512,
            max_timeouts: 10,
            request_timeout: Duration::from_secs(5),
            request_length: 192,
            skeleton_stride: 192,
            skeleton_anchor_threshold: 4,
            request_interval: Duration::from_millis(500),
            insert_interval: Duration::from_secs(1),
            log_prefix: "Headers".to_string(),
        }
    }
}

impl DownloadConfig {
    /// Create a new configuration for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Create a configuration for mainnet.
    pub fn mainnet() -> Self {
        Self::new(Network::Mainnet)
    }

    /// Create a configuration for testnet.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Create a configuration for regtest.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    pub fn with_tip_limit(mut self, limit: usize) -> Self {
        self.tip_limit = limit;
        self
    }

    pub fn with_persisted_tip_limit(mut self, limit: usize) -> Self {
        self.persisted_tip_limit = limit;
        self
    }

    pub fn with_anchor_limit(mut self, limit: usize) -> Self {
        self.anchor_limit = limit;
        self
    }

    pub fn with_max_timeouts(mut self, max_timeouts: u32) -> Self {
        self.max_timeouts = max_timeouts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the periods of the request and insert loops.
    pub fn with_intervals(mut self, request: Duration, insert: Duration) -> Self {
        self.request_interval = request;
        self.insert_interval = insert;
        self
    }

    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tip_limit", self.tip_limit as u64),
            ("persisted_tip_limit", self.persisted_tip_limit as u64),
            ("anchor_limit", self.anchor_limit as u64),
            ("max_timeouts", self.max_timeouts as u64),
            ("request_length", self.request_length),
            ("skeleton_stride", self.skeleton_stride),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.request_interval.is_zero() {
            return Err(ConfigError::Zero("request_interval"));
        }
        if self.insert_interval.is_zero() {
            return Err(ConfigError::Zero("insert_interval"));
        }
        if self.request_timeout < Duration::from_secs(1) {
            return Err(ConfigError::BelowOneSecond("request_timeout"));
        }
        Ok(())
    }
}
