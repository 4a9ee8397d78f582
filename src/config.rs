use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::key::GroupId;
use crate::lookup::PathStyle;
use crate::quorum::SuccessMode;
use crate::session::Remote;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Initial storage nodes the session connects to.
    #[serde(default)]
    pub remotes: Vec<Remote>,

    /// Default candidate group list; the head is the affinity anchor.
    #[serde(default)]
    pub groups: Vec<GroupId>,

    /// Base for download-port synthesis: port = base_port + group id.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Groups an object is written to. 0 means "as many as `groups` has".
    #[serde(default)]
    pub replication_count: u32,

    #[serde(default)]
    pub success_mode: SuccessMode,

    /// Minimum live-session count below which operations refuse to run.
    #[serde(default)]
    pub die_limit: usize,

    /// Chunked-upload stride in bytes. 0 disables chunked uploads.
    #[serde(default)]
    pub chunk_size: u64,

    #[serde(default)]
    pub eblob_style_path: bool,

    /// Directory-shard width (bits of the id) for derived logical paths.
    #[serde(default = "default_directory_bit_num")]
    pub directory_bit_num: u32,

    /// Per wire call timeout, seconds.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u64,

    /// Transport liveness-check period, seconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout: u64,

    #[serde(default)]
    pub balancer: Option<BalancerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Base URL of the metadata balancer bus.
    pub endpoint: String,

    /// Seconds between weighted-cache refreshes.
    #[serde(default = "default_refresh_period")]
    pub group_weights_refresh_period: u64,

    #[serde(default)]
    pub usage: BalancerUsage,
}

/// How hard write-time group selection leans on the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BalancerUsage {
    /// Never consulted.
    #[default]
    None,
    /// Consulted; failures fall back to the static selection.
    Optional,
    /// Consulted; failures fail the write.
    Normal,
    /// Always overrides the caller's groups; failures fail the write.
    Mandatory,
}

fn default_base_port() -> u16 {
    1024
}

fn default_directory_bit_num() -> u32 {
    8
}

fn default_wait_timeout() -> u64 {
    5
}

fn default_check_timeout() -> u64 {
    20
}

fn default_refresh_period() -> u64 {
    60
}

impl ProxyConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("QUARRY"))
            .build()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        let config: ProxyConfig = settings
            .try_deserialize()
            .map_err(|e| ProxyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remotes.is_empty() {
            return Err(ProxyError::Config("remotes can't be empty".to_string()));
        }
        Ok(())
    }

    /// Replication count with the zero default resolved.
    pub fn resolved_replication(&self) -> usize {
        if self.replication_count == 0 {
            self.groups.len()
        } else {
            self.replication_count as usize
        }
    }

    pub fn path_style(&self) -> PathStyle {
        PathStyle {
            eblob: self.eblob_style_path,
            base_port: self.base_port,
            directory_bit_num: self.directory_bit_num,
        }
    }

    pub fn balancer_usage(&self) -> BalancerUsage {
        self.balancer
            .as_ref()
            .map(|balancer| balancer.usage)
            .unwrap_or(BalancerUsage::None)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            remotes: Vec::new(),
            groups: Vec::new(),
            base_port: default_base_port(),
            replication_count: 0,
            success_mode: SuccessMode::default(),
            die_limit: 0,
            chunk_size: 0,
            eblob_style_path: false,
            directory_bit_num: default_directory_bit_num(),
            wait_timeout: default_wait_timeout(),
            check_timeout: default_check_timeout(),
            balancer: None,
        }
    }
}
