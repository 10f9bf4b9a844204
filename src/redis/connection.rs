use std::sync::{Arc, PoisonError, RwLock};

use redis::{
    Client, Cmd, ConnectionAddr, ConnectionInfo, ErrorKind, FromRedisValue, RedisConnectionInfo,
    RedisError, RedisResult, ScriptInvocation, Value,
    aio::{ConnectionManager, MultiplexedConnection},
    cluster::ClusterClientBuilder,
    cluster_async::ClusterConnection,
    sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType},
};

use crate::{
    SlidelimitError,
    redis::{RedisStoreOptions, Topology},
};

pub(crate) const CLUSTER_SLOT_COUNT: usize = 16384;

/// One async connection of whichever kind the topology needs.
#[derive(Clone)]
pub(crate) enum RedisConnection {
    Managed(ConnectionManager),
    Sentinel(Arc<SentinelConnection>),
    Cluster(ClusterConnection),
}

impl RedisConnection {
    pub(crate) async fn invoke<T: FromRedisValue>(
        &self,
        invocation: &ScriptInvocation<'_>,
    ) -> RedisResult<T> {
        match self {
            Self::Managed(conn) => invocation.invoke_async(&mut conn.clone()).await,
            Self::Sentinel(conn) => {
                let result = invocation.invoke_async(&mut conn.current()).await;
                conn.observe(result).await
            }
            Self::Cluster(conn) => invocation.invoke_async(&mut conn.clone()).await,
        }
    }

    pub(crate) async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        match self {
            Self::Managed(conn) => cmd.query_async(&mut conn.clone()).await,
            Self::Sentinel(conn) => {
                let result = cmd.query_async(&mut conn.current()).await;
                conn.observe(result).await
            }
            Self::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        }
    }
}

/// A connection to whichever node Sentinel currently reports for a role.
///
/// The node is resolved at connect time and again after any failure that
/// suggests it moved (dropped socket, refused connection, `READONLY` from a
/// demoted master). The failing call still returns its error; later calls use
/// the freshly resolved node.
pub(crate) struct SentinelConnection {
    sentinels: Vec<ConnectionInfo>,
    service_name: String,
    node_info: SentinelNodeConnectionInfo,
    replica: bool,
    current: RwLock<MultiplexedConnection>,
}

impl SentinelConnection {
    async fn connect(
        sentinels: Vec<ConnectionInfo>,
        service_name: String,
        node_info: SentinelNodeConnectionInfo,
        replica: bool,
    ) -> RedisResult<Self> {
        let current = resolve(&sentinels, &service_name, &node_info, replica).await?;

        Ok(Self {
            sentinels,
            service_name,
            node_info,
            replica,
            current: RwLock::new(current),
        })
    }

    fn current(&self) -> MultiplexedConnection {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn observe<T>(&self, result: RedisResult<T>) -> RedisResult<T> {
        let stale = result.as_ref().err().is_some_and(needs_rediscovery);
        if !stale {
            return result;
        }

        tracing::warn!(
            service_name = %self.service_name,
            replica = self.replica,
            "redis.sentinel.rediscover"
        );

        match resolve(&self.sentinels, &self.service_name, &self.node_info, self.replica).await {
            Ok(fresh) => {
                *self.current.write().unwrap_or_else(PoisonError::into_inner) = fresh;
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    service_name = %self.service_name,
                    "redis.sentinel.rediscover.failed"
                );
            }
        }

        result
    } // end method observe
}

async fn resolve(
    sentinels: &[ConnectionInfo],
    service_name: &str,
    node_info: &SentinelNodeConnectionInfo,
    replica: bool,
) -> RedisResult<MultiplexedConnection> {
    let server_type = if replica {
        SentinelServerType::Replica
    } else {
        SentinelServerType::Master
    };

    let mut client = SentinelClient::build(
        sentinels.to_vec(),
        service_name.to_string(),
        Some(node_info.clone()),
        server_type,
    )?;

    client.get_async_connection().await
}

/// Whether an error means the connection's node may no longer hold its role.
pub(crate) fn needs_rediscovery(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.kind() == ErrorKind::ReadOnly
}

/// A write connection plus an optional replica connection for reads.
pub(crate) struct RedisConnections {
    pub primary: RedisConnection,
    pub replica: Option<RedisConnection>,
}

fn connection_info(host: &str, port: u16, password: Option<&str>) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            password: password.map(str::to_string),
            ..RedisConnectionInfo::default()
        },
    }
}

pub(crate) async fn connect(
    options: &RedisStoreOptions,
) -> Result<RedisConnections, SlidelimitError> {
    options.validate()?;

    let info = connection_info(&options.host, options.port, options.password.as_deref());

    match &options.topology {
        Topology::Single => {
            if options.prefer_replica_reads {
                tracing::warn!("redis.connect, prefer_replica_reads ignored for a single node");
            }

            let client = Client::open(info)?;
            let primary = RedisConnection::Managed(client.get_connection_manager().await?);
            tracing::info!(host = %options.host, port = options.port, "redis.connect.single");

            Ok(RedisConnections {
                primary,
                replica: None,
            })
        }
        Topology::Sentinel { service_name } => {
            let primary = sentinel_connection(options, info.clone(), service_name, false).await?;

            let replica = if options.prefer_replica_reads {
                Some(sentinel_connection(options, info, service_name, true).await?)
            } else {
                None
            };

            tracing::info!(
                host = %options.host,
                port = options.port,
                service_name = %service_name,
                replica_reads = replica.is_some(),
                "redis.connect.sentinel"
            );

            Ok(RedisConnections { primary, replica })
        }
        Topology::Cluster => {
            let mut builder = ClusterClientBuilder::new(vec![info]);
            if let Some(password) = &options.password {
                builder = builder.password(password.clone());
            }
            if options.prefer_replica_reads {
                builder = builder.read_from_replicas();
            }

            let client = builder.build()?;
            let conn = client.get_async_connection().await?;

            if options.require_full_coverage {
                verify_full_coverage(&conn).await?;
            }

            tracing::info!(
                host = %options.host,
                port = options.port,
                replica_reads = options.prefer_replica_reads,
                "redis.connect.cluster"
            );

            // Replica routing happens inside the cluster connection.
            Ok(RedisConnections {
                primary: RedisConnection::Cluster(conn),
                replica: None,
            })
        }
    }
}

async fn sentinel_connection(
    options: &RedisStoreOptions,
    sentinel: ConnectionInfo,
    service_name: &str,
    replica: bool,
) -> Result<RedisConnection, SlidelimitError> {
    let mut node_info = SentinelNodeConnectionInfo::default();
    node_info.redis_connection_info = Some(RedisConnectionInfo {
        password: options.password.clone(),
        ..RedisConnectionInfo::default()
    });

    let conn =
        SentinelConnection::connect(vec![sentinel], service_name.to_string(), node_info, replica)
            .await?;

    Ok(RedisConnection::Sentinel(Arc::new(conn)))
}

async fn verify_full_coverage(conn: &ClusterConnection) -> Result<(), SlidelimitError> {
    let mut conn = conn.clone();
    let slots: Vec<Vec<Value>> = redis::cmd("CLUSTER")
        .arg("SLOTS")
        .query_async(&mut conn)
        .await?;

    let mut ranges = Vec::with_capacity(slots.len());
    for entry in &slots {
        if entry.len() < 2 {
            continue;
        }
        let start: u16 = redis::from_redis_value(&entry[0])?;
        let end: u16 = redis::from_redis_value(&entry[1])?;
        ranges.push((start, end));
    }

    let covered = covered_slots(&ranges);
    if covered < CLUSTER_SLOT_COUNT {
        return Err(SlidelimitError::InvalidConfiguration(format!(
            "cluster serves {covered} of {CLUSTER_SLOT_COUNT} hash slots"
        )));
    }

    Ok(())
}

/// Number of distinct hash slots covered by inclusive `(start, end)` ranges.
pub(crate) fn covered_slots(ranges: &[(u16, u16)]) -> usize {
    let mut covered = vec![false; CLUSTER_SLOT_COUNT];

    for &(start, end) in ranges {
        let start = usize::from(start);
        let end = usize::from(end).min(CLUSTER_SLOT_COUNT - 1);
        if start <= end {
            covered[start..=end].fill(true);
        }
    }

    covered.into_iter().filter(|slot| *slot).count()
}
