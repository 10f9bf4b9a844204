use serde::Deserialize;

use crate::SlidelimitError;

/// How the Redis deployment is laid out.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Topology {
    /// One Redis server at `host:port`.
    #[default]
    Single,
    /// Redis Sentinel at `host:port`, monitoring `service_name`.
    Sentinel {
        /// Name of the monitored master group.
        service_name: String,
    },
    /// Redis Cluster, with `host:port` as the seed node.
    Cluster,
}

/// Connection settings for [`RedisStore::connect`](crate::redis::RedisStore::connect).
///
/// Deserializable, so it can live in whatever configuration file the
/// application already loads. Missing fields take their defaults.
///
/// # Examples
///
/// ```
/// use slidelimit::redis::{RedisStoreOptions, Topology};
///
/// let options = RedisStoreOptions {
///     host: "sentinel.internal".to_string(),
///     port: 26379,
///     topology: Topology::Sentinel {
///         service_name: "limits".to_string(),
///     },
///     prefer_replica_reads: true,
///     ..RedisStoreOptions::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisStoreOptions {
    /// Server, sentinel or cluster seed host. Defaults to `127.0.0.1`.
    pub host: String,

    /// Port on `host`. Defaults to 6379.
    pub port: u16,

    /// Password for the data nodes (and the sentinels, for `Sentinel`).
    pub password: Option<String>,

    /// Deployment layout. Defaults to [`Topology::Single`].
    pub topology: Topology,

    /// Serve read-only transactions from replicas.
    ///
    /// `Sentinel` opens a second connection to a replica; `Cluster` routes
    /// reads to replicas. Ignored for `Single`. Replica reads can be stale.
    pub prefer_replica_reads: bool,

    /// `Cluster` only: refuse to connect unless every hash slot is served.
    pub require_full_coverage: bool,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            topology: Topology::Single,
            prefer_replica_reads: false,
            require_full_coverage: false,
        }
    }
}

impl RedisStoreOptions {
    /// Check the options without connecting.
    pub fn validate(&self) -> Result<(), SlidelimitError> {
        if self.host.is_empty() {
            return Err(SlidelimitError::InvalidConfiguration(
                "Redis host must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(SlidelimitError::InvalidConfiguration(
                "Redis port must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.topology, Topology::Sentinel { service_name } if service_name.is_empty()) {
            return Err(SlidelimitError::InvalidConfiguration(
                "Sentinel service name must not be empty".to_string(),
            ));
        }

        if self.require_full_coverage && self.topology != Topology::Cluster {
            return Err(SlidelimitError::InvalidConfiguration(
                "require_full_coverage only applies to the cluster topology".to_string(),
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for RedisStoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStoreOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("topology", &self.topology)
            .field("prefer_replica_reads", &self.prefer_replica_reads)
            .field("require_full_coverage", &self.require_full_coverage)
            .finish()
    }
}
