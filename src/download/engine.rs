use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::nzb::{Nzb, NzbFile};
use crate::config::Config;
use crate::error::{ConfigError, DownloadError, NzbFetchError};
use crate::nntp::NntpClient;
use crate::sink::{MappedSink, SinkWrite};

type Result<T> = std::result::Result<T, NzbFetchError>;

/// Default in-flight segment cap: a little more than the servers can
/// serve concurrently, so a connection never sits idle waiting for a
/// task while tasks never pile up unboundedly.
const IN_FLIGHT_HEADROOM: usize = 4;

/// Per-NZB download orchestrator: one pooled client per server, one
/// task per segment, a global permit cap across the whole NZB.
pub struct DownloadEngine {
    clients: Arc<Vec<Arc<NntpClient>>>,
    permits: Arc<Semaphore>,
    next_client: Arc<AtomicUsize>,
    output_dir: PathBuf,
    progress: Option<ProgressBar>,
}

impl DownloadEngine {
    pub fn new(config: &Config) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(ConfigError::NoServer.into());
        }
        let clients = config
            .servers
            .iter()
            .map(|server| NntpClient::new(server.clone()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let total_conns: usize = clients.iter().map(|c| c.max_connections()).sum();
        let max_in_flight = config
            .download
            .max_in_flight
            .unwrap_or(total_conns + IN_FLIGHT_HEADROOM);

        Ok(Self {
            clients: Arc::new(clients),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            next_client: Arc::new(AtomicUsize::new(0)),
            output_dir: config.download.dir.clone(),
            progress: None,
        })
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Download every file of the NZB. The first failing file cancels
    /// the rest; its error is the one reported.
    pub async fn download(&self, nzb: &Nzb) -> Result<()> {
        self.download_with_token(nzb, CancellationToken::new())
            .await
    }

    /// Like [`download`](Self::download), but bound to a caller-owned
    /// cancellation token: cancelling it aborts every in-flight
    /// segment and pool acquire.
    pub async fn download_with_token(&self, nzb: &Nzb, token: CancellationToken) -> Result<()> {
        let scope = token.child_token();
        let mut files: JoinSet<Result<()>> = JoinSet::new();

        for file in nzb.files() {
            let name = file.file_name();
            if name.to_ascii_lowercase().ends_with(".par2") {
                tracing::info!(file = %name, "skipping par2 recovery file");
                continue;
            }
            files.spawn(Self::download_file(
                self.clients.clone(),
                self.next_client.clone(),
                self.permits.clone(),
                self.output_dir.join(&name),
                self.progress.clone(),
                scope.clone(),
                file.clone(),
            ));
        }

        let mut first_err: Option<NzbFetchError> = None;
        while let Some(joined) = files.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(DownloadError::Task(e.to_string()).into()));
            if let Err(e) = result {
                if e.is_cancelled() {
                    continue;
                }
                if first_err.is_none() {
                    scope.cancel();
                    first_err = Some(e);
                } else {
                    tracing::debug!(error = %e, "additional failure after cancellation");
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None if scope.is_cancelled() => Err(DownloadError::Cancelled.into()),
            None => Ok(()),
        }
    }

    /// Download one file: size and map the destination, fan out the
    /// segments, and release the mapping once every task finished.
    async fn download_file(
        clients: Arc<Vec<Arc<NntpClient>>>,
        next_client: Arc<AtomicUsize>,
        permits: Arc<Semaphore>,
        path: PathBuf,
        progress: Option<ProgressBar>,
        token: CancellationToken,
        file: NzbFile,
    ) -> Result<()> {
        let file_name = file.file_name();
        let total_size = file.total_size();
        let segment_count = file.segments.segment.len();
        tracing::info!(
            file = %file_name,
            segments = segment_count,
            bytes = total_size,
            "downloading file"
        );

        let dest = tokio::fs::File::create(&path).await?;
        dest.set_len(total_size).await?;
        if segment_count == 0 || total_size == 0 {
            return Ok(());
        }
        let dest = dest.into_std().await;

        let sink = Arc::new(MappedSink::new(&dest)?);
        let groups = Arc::new(file.groups.group.clone());
        let file_token = token.child_token();

        let mut tasks: JoinSet<Result<u64>> = JoinSet::new();
        for segment in file.segments.segment.iter().cloned() {
            let clients = clients.clone();
            let next_client = next_client.clone();
            let permits = permits.clone();
            let token = file_token.clone();
            let sink = sink.clone();
            let groups = groups.clone();
            let progress = progress.clone();
            let file_name = file_name.clone();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => {
                        permit.map_err(|_| DownloadError::Cancelled)?
                    }
                    _ = token.cancelled() => return Err(DownloadError::Cancelled.into()),
                };

                let client =
                    clients[next_client.fetch_add(1, Ordering::Relaxed) % clients.len()].clone();
                let decoded = client
                    .download(&token, &groups, &segment.message_id, sink.as_ref())
                    .await?;

                tracing::debug!(
                    file = %file_name,
                    segment = segment.number,
                    server = client.host(),
                    offset = decoded.begin,
                    bytes = decoded.len,
                    "segment complete"
                );
                if let Some(bar) = &progress {
                    bar.inc(segment.bytes);
                }
                Ok(decoded.begin + decoded.len)
            });
        }

        let mut first_err: Option<NzbFetchError> = None;
        let mut high_water: u64 = 0;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| Err(DownloadError::Task(e.to_string()).into()));
            match result {
                Ok(end) => high_water = high_water.max(end),
                Err(e) => {
                    if e.is_cancelled() {
                        continue;
                    }
                    if first_err.is_none() {
                        file_token.cancel();
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => {
                // Keep the partial file for inspection, but push what
                // landed out to disk before unmapping.
                let _ = sink.flush();
                drop(sink);
                tracing::warn!(file = %file_name, error = %e, "file failed");
                Err(DownloadError::File {
                    name: file_name,
                    source: Box::new(e),
                }
                .into())
            }
            None if file_token.is_cancelled() => {
                let _ = sink.flush();
                drop(sink);
                Err(DownloadError::Cancelled.into())
            }
            None => {
                sink.flush()?;
                drop(sink);
                // The NZB's nominal segment sizes are encoded sizes and
                // over-allocate; trim to the bytes actually decoded.
                if high_water < total_size {
                    tokio::task::spawn_blocking(move || dest.set_len(high_water))
                        .await
                        .map_err(|e| DownloadError::Task(e.to_string()))??;
                }
                tracing::info!(file = %file_name, bytes = high_water, "file complete");
                Ok(())
            }
        }
    }

    /// Close every server's pool. In-flight commands finish and their
    /// connections close on their own way out.
    pub fn shutdown(&self) {
        for client in self.clients.iter() {
            client.shutdown();
        }
    }

    /// Live connections across all servers (idle + borrowed).
    pub fn live_connections(&self) -> usize {
        self.clients.iter().map(|c| c.live_connections()).sum()
    }
}
