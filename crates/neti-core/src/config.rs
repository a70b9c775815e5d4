//! Agent configuration
//!
//! Read once at startup from the well-known path, with a testing-mode
//! fallback in the current directory and a `-c` override. The file is
//! TOML with one section per realm (`[ec2]`, `[vpc]`) plus the agent
//! section (`[neti]`).

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::member::InstanceId;
use crate::realm::Realm;

/// Well-known configuration path on a deployed host
pub const WELL_KNOWN_PATH: &str = "/etc/neti/neti.conf";

/// Fallback path in the current directory, assumed to be a testing setup
pub const TESTING_FALLBACK: &str = "testing.conf";

/// Per-realm settings: the coordination ensemble serving the realm and the
/// overlay subnet its hosts draw addresses from
#[derive(Debug, Clone, Deserialize)]
pub struct RealmConfig {
    /// Comma-separated coordination-ensemble endpoints
    pub zk_hosts: String,
    /// Overlay subnet for hosts in this realm; must be disjoint from the
    /// other realm's subnet (configuration precondition, not enforced here)
    pub overlay_subnet: Ipv4Net,
}

/// The `[neti]` section
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Prefix all coordination paths live under
    pub zk_prefix: String,
    /// Node name of the overlay-address → instance reverse map
    pub zk_iptoid_node: String,
    /// Node name of the instance → overlay-address forward lease
    pub zk_idtoip_node: String,
    /// Node name of the ephemeral membership group
    pub zk_ip_map_node: String,
    /// Cloud API credentials for instance tagging
    pub aws_key: String,
    pub aws_secret_key: String,
    /// Path for the info/error log
    pub log_file: PathBuf,
    /// Comma-separated address literals or CIDRs allowed to reach port 22
    pub ssh_whitelist: String,
    /// Accept new/established TCP ingress to port 80
    pub open_80: bool,
    /// Drop all other TCP ingress after the whitelists have had their say
    pub reject_all: bool,
}

/// Full agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ec2: RealmConfig,
    pub vpc: RealmConfig,
    pub neti: AgentConfig,
}

impl Config {
    /// Resolve the config path and parse it.
    ///
    /// An explicit path (from `-c`) wins; otherwise the well-known path is
    /// tried, then the testing fallback in the current directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None if Path::new(WELL_KNOWN_PATH).exists() => PathBuf::from(WELL_KNOWN_PATH),
            None if Path::new(TESTING_FALLBACK).exists() => PathBuf::from(TESTING_FALLBACK),
            None => {
                return Err(ConfigError::NotFound {
                    well_known: WELL_KNOWN_PATH.to_string(),
                    fallback: TESTING_FALLBACK.to_string(),
                });
            }
        };
        Self::from_path(&path)
    }

    /// Parse the file at `path`
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// The realm section for `realm`
    pub fn realm(&self, realm: Realm) -> &RealmConfig {
        match realm {
            Realm::Legacy => &self.ec2,
            Realm::Vpc => &self.vpc,
        }
    }

    /// The ssh whitelist split into individual entries
    pub fn ssh_whitelist_entries(&self) -> Vec<String> {
        self.neti
            .ssh_whitelist
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Coordination-store paths derived from the `[neti]` section
    pub fn registry_paths(&self) -> RegistryPaths {
        RegistryPaths::new(
            &self.neti.zk_prefix,
            &self.neti.zk_iptoid_node,
            &self.neti.zk_idtoip_node,
            &self.neti.zk_ip_map_node,
        )
    }
}

/// The three coordination-store locations the agent works with, all under
/// the configured prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPaths {
    ip_to_id_root: String,
    id_to_ip_root: String,
    ip_map: String,
}

impl RegistryPaths {
    pub fn new(prefix: &str, iptoid_node: &str, idtoip_node: &str, ip_map_node: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            ip_to_id_root: format!("{prefix}/{iptoid_node}"),
            id_to_ip_root: format!("{prefix}/{idtoip_node}"),
            ip_map: format!("{prefix}/{ip_map_node}"),
        }
    }

    /// Parent of the reverse map (overlay address → owning instance)
    pub fn ip_to_id_root(&self) -> &str {
        &self.ip_to_id_root
    }

    /// Parent of the forward leases (instance → overlay address)
    pub fn id_to_ip_root(&self) -> &str {
        &self.id_to_ip_root
    }

    /// Parent of the ephemeral membership group
    pub fn ip_map(&self) -> &str {
        &self.ip_map
    }

    /// The durable forward lease for one instance
    pub fn forward_lease(&self, instance: &InstanceId) -> String {
        format!("{}/{}", self.id_to_ip_root, instance)
    }

    /// The durable reverse-map entry for one overlay address
    pub fn reverse_map(&self, overlay: Ipv4Addr) -> String {
        format!("{}/{}", self.ip_to_id_root, overlay)
    }
}
