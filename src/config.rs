//! Runtime configuration for one relay instance
//!
//! Every tunable named in §6 of the specification is represented here as a
//! validated `nutype` newtype, the way `RouterConfig` wraps every one of its
//! tunables rather than passing bare integers around.

use crate::domain_types::{InstancePort, ServerName};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while loading or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed as TOML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// A field failed validation after parsing.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason it is invalid.
        reason: String,
    },
}

/// Outbound HTTP client concurrency (`http_max_clients`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into)
)]
pub struct HttpMaxClients(usize);

/// Number of CustomerIDs a non-master instance requests per range fetch (`range_size`).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into)
)]
pub struct RangeSize(u64);

/// Hard per-connection in-RAM body buffer bound (§4.1, 64 KiB by default).
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into)
)]
pub struct MaxBufferSize(usize);

macro_rules! millis_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[nutype(
            validate(greater = 0),
            derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Into)
        )]
        pub struct $name(u64);

        impl $name {
            /// Converts to a [`Duration`].
            #[must_use]
            pub fn as_duration(&self) -> Duration {
                Duration::from_millis(self.into_inner())
            }
        }
    };
}

millis_newtype!(TimeoutAgent, "How long an `Agent_ready` wait lives before a no-client reply.");
millis_newtype!(TimeoutCache, "TTL of an `AgentCacheEntry`.");
millis_newtype!(TimeoutClient, "Per-iteration sleep of the client rendezvous spin loop.");
millis_newtype!(TimeoutNoReply, "How long a client waits for `agentreply` before recycling.");

/// TLS coordinates the process records but never acts on (§1: TLS is delegated
/// to a front proxy; this struct exists purely for operational visibility in logs).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to a certificate file, recorded but unused.
    pub certfile: Option<PathBuf>,
    /// Path to a key file, recorded but unused.
    pub keyfile: Option<PathBuf>,
    /// Port an external proxy is expected to terminate TLS on.
    pub port_ssl: Option<u16>,
}

/// One `upper_bound_bytes -> chunk_bytes` row of the relay's buffer-size policy (§4.3 step 2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BufferSizeRule {
    /// Smallest Content-Length this rule does NOT apply to (exclusive upper bound).
    pub upper_bound: Option<u64>,
    /// Forward chunk size to use for Content-Lengths below `upper_bound`.
    pub chunk_bytes: usize,
}

/// Ordered `Content-Length -> forward chunk size` table from §6 `buffer_size`.
///
/// Rows are tried in order; the first rule whose `upper_bound` is strictly
/// greater than the Content-Length wins. The default table is a single
/// `{∞: 4096}` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSizeTable(pub Vec<BufferSizeRule>);

impl Default for BufferSizeTable {
    fn default() -> Self {
        Self(vec![BufferSizeRule {
            upper_bound: None,
            chunk_bytes: 4096,
        }])
    }
}

impl BufferSizeTable {
    /// Picks the forward chunk size for a given Content-Length.
    #[must_use]
    pub fn chunk_size_for(&self, content_length: u64) -> usize {
        self.0
            .iter()
            .find(|rule| rule.upper_bound.is_none_or(|bound| content_length < bound))
            .map_or(4096, |rule| rule.chunk_bytes)
    }
}

/// Static membership seed: one peer instance's coordinates (`sites`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// DNS name of the peer's host.
    pub host: ServerName,
    /// Port the peer listens on.
    pub port: InstancePort,
}

/// Complete configuration for one relay instance, as loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This instance's own DNS name.
    pub server: ServerName,
    /// This instance's own listening port.
    pub port: InstancePort,
    /// Interface to bind (distinct from `server`, which is the DNS name peers use).
    pub host: String,
    /// TLS coordinates, recorded but not acted upon (§10.1).
    #[serde(default)]
    pub tls: TlsConfig,
    /// Coordinates of the cluster's master instance.
    pub master: SiteConfig,
    /// Path to this instance's own persistent CustomerID range file.
    pub range_file: PathBuf,
    /// How many IDs to request per range fetch.
    pub range_size: RangeSize,
    /// Path to the master's cluster-wide range file (only meaningful when `is_master`).
    pub master_range: PathBuf,
    /// Whether this instance is the master.
    pub is_master: bool,
    /// Statically configured peer instances to gossip with at startup.
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    /// Outbound HTTP client concurrency.
    pub http_max_clients: HttpMaxClients,
    /// `timeout_agent`.
    pub timeout_agent: TimeoutAgent,
    /// `timeout_cache`.
    pub timeout_cache: TimeoutCache,
    /// `timeout_client`.
    pub timeout_client: TimeoutClient,
    /// `timeout_no_reply`.
    pub timeout_no_reply: TimeoutNoReply,
    /// Hard per-connection in-RAM buffer bound (§4.1).
    pub max_buffer_size: MaxBufferSize,
    /// Relay forward-chunk-size policy (§4.3 step 2).
    #[serde(default)]
    pub buffer_size: BufferSizeTable,
}

impl Config {
    /// Loads and validates a configuration from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, cannot be parsed, or
    /// fails validation.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants that serde cannot express alone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `is_master` is set but
    /// `master.host`/`master.port` don't equal `server`/`port` (a master must
    /// name itself as the master).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_master
            && (self.master.host != self.server || self.master.port != self.port)
        {
            return Err(ConfigError::Validation {
                field: "master".to_string(),
                reason: "a master instance must list itself as its own master".to_string(),
            });
        }
        Ok(())
    }

    /// A development preset: short timeouts, a local master, loopback binding.
    ///
    /// # Panics
    ///
    /// Panics if any hardcoded value fails its domain-type validation; this
    /// cannot happen for the literals used here.
    #[must_use]
    pub fn development() -> Self {
        let server = ServerName::try_new("localhost").expect("non-empty literal");
        let port = InstancePort::new(8080);
        Self {
            server: server.clone(),
            port,
            host: "127.0.0.1".to_string(),
            tls: TlsConfig::default(),
            master: SiteConfig {
                host: server,
                port,
            },
            range_file: PathBuf::from("./data/range.txt"),
            range_size: RangeSize::try_new(1_000).expect("positive literal"),
            master_range: PathBuf::from("./data/master_range.txt"),
            is_master: true,
            sites: Vec::new(),
            http_max_clients: HttpMaxClients::try_new(10).expect("positive literal"),
            timeout_agent: TimeoutAgent::try_new(60_000).expect("positive literal"),
            timeout_cache: TimeoutCache::try_new(5_000).expect("positive literal"),
            timeout_client: TimeoutClient::try_new(5_000).expect("positive literal"),
            timeout_no_reply: TimeoutNoReply::try_new(15_000).expect("positive literal"),
            max_buffer_size: MaxBufferSize::try_new(64 * 1024).expect("positive literal"),
            buffer_size: BufferSizeTable::default(),
        }
    }

    /// A production preset: larger range fetches, more outbound concurrency.
    ///
    /// # Panics
    ///
    /// Panics if any hardcoded value fails its domain-type validation; this
    /// cannot happen for the literals used here.
    #[must_use]
    pub fn production(server: ServerName, port: InstancePort, master: SiteConfig) -> Self {
        Self {
            server,
            port,
            host: "0.0.0.0".to_string(),
            tls: TlsConfig::default(),
            master,
            range_file: PathBuf::from("/var/lib/relaymesh/range.txt"),
            range_size: RangeSize::try_new(100_000).expect("positive literal"),
            master_range: PathBuf::from("/var/lib/relaymesh/master_range.txt"),
            is_master: false,
            sites: Vec::new(),
            http_max_clients: HttpMaxClients::try_new(32).expect("positive literal"),
            timeout_agent: TimeoutAgent::try_new(60_000).expect("positive literal"),
            timeout_cache: TimeoutCache::try_new(5_000).expect("positive literal"),
            timeout_client: TimeoutClient::try_new(5_000).expect("positive literal"),
            timeout_no_reply: TimeoutNoReply::try_new(15_000).expect("positive literal"),
            max_buffer_size: MaxBufferSize::try_new(64 * 1024).expect("positive literal"),
            buffer_size: BufferSizeTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_table_picks_smallest_strictly_greater_bound() {
        let table = BufferSizeTable(vec![
            BufferSizeRule {
                upper_bound: Some(1024),
                chunk_bytes: 512,
            },
            BufferSizeRule {
                upper_bound: Some(65536),
                chunk_bytes: 4096,
            },
            BufferSizeRule {
                upper_bound: None,
                chunk_bytes: 16384,
            },
        ]);
        assert_eq!(table.chunk_size_for(10), 512);
        assert_eq!(table.chunk_size_for(2000), 4096);
        assert_eq!(table.chunk_size_for(1_000_000), 16384);
    }

    #[test]
    fn default_buffer_size_table_is_flat_4096() {
        let table = BufferSizeTable::default();
        assert_eq!(table.chunk_size_for(0), 4096);
        assert_eq!(table.chunk_size_for(u64::MAX), 4096);
    }

    #[test]
    fn master_must_name_itself() {
        let mut config = Config::development();
        config.master.port = InstancePort::new(9999);
        assert!(config.validate().is_err());
    }

    #[test]
    fn development_preset_validates() {
        assert!(Config::development().validate().is_ok());
    }
}
