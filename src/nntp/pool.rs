//! Connection pool for NNTP connections using deadpool
//!
//! The pool caps live connections at the server's `max_conn`, hands
//! released connections straight to the oldest waiter, and discards
//! any connection that is not ready to accept a command.

use super::connection::NntpConnection;
use crate::config::ServerConfig;
use crate::error::{NntpError, NzbFetchError};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

/// Connection manager for deadpool
pub struct NntpConnectionManager {
    config: Arc<ServerConfig>,
    tls_connector: Option<Arc<TlsConnector>>,
}

impl NntpConnectionManager {
    pub fn new(config: Arc<ServerConfig>, tls_connector: Option<Arc<TlsConnector>>) -> Self {
        Self {
            config,
            tls_connector,
        }
    }
}

impl Manager for NntpConnectionManager {
    type Type = NntpConnection;
    type Error = NzbFetchError;

    async fn create(&self) -> Result<NntpConnection, NzbFetchError> {
        NntpConnection::connect(&self.config, self.tls_connector.clone())
            .await
            .map_err(|e| {
                tracing::warn!(server = %self.config.host, error = %e, "failed to create NNTP connection");
                e
            })
    }

    async fn recycle(
        &self,
        conn: &mut NntpConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<NzbFetchError> {
        // Validity predicate: a connection left mid-command or broken by
        // a transport error is dropped, which frees its pool slot.
        if conn.is_ready() {
            Ok(())
        } else {
            Err(RecycleError::Backend(
                NntpError::UnhealthyConnection.into(),
            ))
        }
    }
}

/// NNTP connection pool
pub type NntpPool = Pool<NntpConnectionManager>;

/// A connection borrowed from the pool. Dropping it returns the
/// connection; [`Object::take`] removes it for good.
pub type PooledConnection = Object<NntpConnectionManager>;

/// Builder for creating connection pools with configuration
pub struct NntpPoolBuilder {
    config: Arc<ServerConfig>,
    tls_connector: Option<Arc<TlsConnector>>,
    max_size: usize,
    timeouts: deadpool::managed::Timeouts,
}

impl NntpPoolBuilder {
    pub fn new(config: Arc<ServerConfig>, tls_connector: Option<Arc<TlsConnector>>) -> Self {
        Self {
            max_size: config.max_conn as usize,
            config,
            tls_connector,
            timeouts: deadpool::managed::Timeouts {
                wait: None,
                create: Some(Duration::from_secs(30)),
                recycle: Some(Duration::from_secs(5)),
            },
        }
    }

    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn build(self) -> Result<NntpPool, NzbFetchError> {
        let manager = NntpConnectionManager::new(self.config, self.tls_connector);
        Pool::builder(manager)
            .max_size(self.max_size)
            .runtime(deadpool::Runtime::Tokio1)
            .timeouts(self.timeouts)
            .build()
            .map_err(|e| NntpError::Protocol(format!("failed to build pool: {}", e)).into())
    }
}

/// Extension trait for the pool to provide convenient methods
#[async_trait]
pub trait NntpPoolExt {
    /// Get a connection, waiting for a free slot if the cap is
    /// reached. Returns `Cancelled` as soon as the token trips.
    async fn get_connection(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection, NzbFetchError>;

    /// Drain idle connections and refuse further acquires.
    fn close_all(&self);
}

#[async_trait]
impl NntpPoolExt for NntpPool {
    async fn get_connection(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection, NzbFetchError> {
        tokio::select! {
            res = self.get() => res.map_err(|e| match e {
                PoolError::Backend(inner) => inner,
                PoolError::Timeout(_) => NntpError::Timeout { seconds: 30 }.into(),
                PoolError::Closed => NntpError::PoolClosed.into(),
                other => NntpError::Protocol(format!("pool error: {}", other)).into(),
            }),
            _ = token.cancelled() => Err(crate::error::DownloadError::Cancelled.into()),
        }
    }

    fn close_all(&self) {
        self.retain(|_, _| false);
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_pool_builder_caps_size() {
        let config = Arc::new(ServerConfig {
            host: "news.example.org".to_string(),
            max_conn: 7,
            ..ServerConfig::default()
        });
        let pool = NntpPoolBuilder::new(config.clone(), None).build().unwrap();
        assert_eq!(pool.status().max_size, 7);
        assert_eq!(pool.status().size, 0);

        let smaller = NntpPoolBuilder::new(config, None)
            .max_size(3)
            .build()
            .unwrap();
        assert_eq!(smaller.status().max_size, 3);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_acquire() {
        let config = Arc::new(ServerConfig {
            host: "news.example.org".to_string(),
            ..ServerConfig::default()
        });
        let pool = NntpPoolBuilder::new(config, None).build().unwrap();
        pool.close_all();

        let token = CancellationToken::new();
        let err = match pool.get_connection(&token).await {
            Err(err) => err,
            Ok(_) => panic!("expected get_connection to fail"),
        };
        assert!(matches!(
            err,
            NzbFetchError::Nntp(NntpError::PoolClosed)
        ));
    }
}
