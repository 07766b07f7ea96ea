//! Per-server NNTP client
//!
//! Owns one connection pool plus everything the pool's factory needs:
//! credentials, TLS configuration and the optional cipher allowlist.
//! One call downloads one article through a borrowed connection.

use std::sync::Arc;

use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use super::connection::NntpConnection;
use super::pool::{NntpPool, NntpPoolBuilder, NntpPoolExt, PooledConnection};
use crate::config::ServerConfig;
use crate::error::{ConfigError, DownloadError, NntpError, NzbFetchError};
use crate::sink::SinkWrite;
use crate::yenc::Decoded;

type Result<T> = std::result::Result<T, NzbFetchError>;

pub struct NntpClient {
    config: Arc<ServerConfig>,
    pool: NntpPool,
}

impl NntpClient {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let config = Arc::new(config);
        let tls_connector = if config.tls {
            Some(Arc::new(build_tls_connector(&config)?))
        } else {
            None
        };
        let pool = NntpPoolBuilder::new(config.clone(), tls_connector).build()?;
        Ok(Self { config, pool })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn max_connections(&self) -> usize {
        self.config.max_conn as usize
    }

    /// Download one article: borrow a connection, select one of the
    /// file's groups, stream the body through the decoder into `sink`,
    /// and give the connection back. A connection that failed at the
    /// transport level, or was abandoned mid-command by cancellation,
    /// is closed instead of returned so its pool slot frees up.
    pub async fn download(
        &self,
        token: &CancellationToken,
        groups: &[String],
        message_id: &str,
        sink: &dyn SinkWrite,
    ) -> Result<Decoded> {
        let mut conn = self.pool.get_connection(token).await?;

        let result = {
            let fetch = Self::fetch(&mut conn, groups, message_id, sink);
            tokio::pin!(fetch);
            tokio::select! {
                res = &mut fetch => res,
                _ = token.cancelled() => Err(DownloadError::Cancelled.into()),
            }
        };

        self.release(conn);
        result
    }

    /// Fetch an article's headers (HEAD does not require a group when
    /// addressed by message-id).
    pub async fn head(
        &self,
        token: &CancellationToken,
        message_id: &str,
    ) -> Result<Vec<(String, String)>> {
        let mut conn = self.pool.get_connection(token).await?;
        let result = conn.head(message_id).await;
        self.release(conn);
        result
    }

    async fn fetch(
        conn: &mut NntpConnection,
        groups: &[String],
        message_id: &str,
        sink: &dyn SinkWrite,
    ) -> Result<Decoded> {
        conn.select_groups(groups).await?;
        conn.body(message_id, sink).await
    }

    fn release(&self, conn: PooledConnection) {
        if conn.is_ready() {
            // Dropping the object returns it to the pool (or hands it
            // directly to the oldest waiter).
            drop(conn);
        } else {
            tracing::debug!(server = %self.config.host, "discarding unusable connection");
            drop(PooledConnection::take(conn));
        }
    }

    /// Close the pool: idle connections are dropped and later acquires
    /// fail. In-flight downloads finish on their own path out.
    pub fn shutdown(&self) {
        self.pool.close_all();
    }

    /// Live connection count as tracked by the pool (idle + borrowed).
    pub fn live_connections(&self) -> usize {
        self.pool.status().size
    }
}

/// Build the server's TLS connector. When a cipher allowlist is
/// configured only the named suites survive, matched against the
/// provider's suite names the same way the server config names them
/// (e.g. `TLS13_AES_256_GCM_SHA384`).
fn build_tls_connector(config: &ServerConfig) -> Result<TlsConnector> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !config.cipher.is_empty() {
        provider
            .cipher_suites
            .retain(|suite| config.cipher.iter().any(|name| suite_name(suite) == *name));
        if provider.cipher_suites.is_empty() {
            return Err(ConfigError::Invalid {
                field: "cipher".to_string(),
                reason: "no configured cipher suite matches a supported one".to_string(),
            }
            .into());
        }
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| NntpError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

fn suite_name(suite: &rustls::SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_cipher_allowlist_filters_by_name() {
        let config = ServerConfig {
            host: "news.example.org".to_string(),
            tls: true,
            cipher: vec!["TLS13_AES_256_GCM_SHA384".to_string()],
            ..ServerConfig::default()
        };
        assert!(build_tls_connector(&config).is_ok());
    }

    #[test]
    fn test_unknown_cipher_rejected() {
        let config = ServerConfig {
            host: "news.example.org".to_string(),
            tls: true,
            cipher: vec!["NOT_A_REAL_SUITE".to_string()],
            ..ServerConfig::default()
        };
        let err = match build_tls_connector(&config) {
            Err(err) => err,
            Ok(_) => panic!("expected build_tls_connector to fail"),
        };
        assert!(matches!(err, NzbFetchError::Config(_)));
    }

    #[test]
    fn test_suite_names_look_like_config_names() {
        let provider = rustls::crypto::ring::default_provider();
        assert!(provider
            .cipher_suites
            .iter()
            .any(|s| suite_name(s).starts_with("TLS13_")));
    }
}
