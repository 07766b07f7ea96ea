use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::{AuthConfig, ServerConfig};
use crate::error::{DecodeError, NntpError, NzbFetchError};
use crate::sink::SinkWrite;
use crate::yenc::{self, Decoded};

type Result<T> = std::result::Result<T, NzbFetchError>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_TIMEOUT: Duration = Duration::from_secs(120);
const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Connection lifecycle. A connection that is not `Ready` when it
/// comes back to the pool is discarded: either the transport failed
/// (`Broken`) or a command was abandoned mid-response (`InCommand`),
/// and in both cases the stream position is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Ready,
    InCommand,
    Broken,
}

/// Parsed details of a `211` group-selection response:
/// `211 <count> <low> <high> <name>`.
#[derive(Debug, Clone)]
pub struct GroupStatus {
    pub name: String,
    pub count: u64,
    pub low: u64,
    pub high: u64,
}

/// One authenticated NNTP session on a single socket. Commands and
/// responses are strictly serialized; `&mut self` on every operation
/// enforces one command at a time.
pub struct NntpConnection {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    /// Last group the server acknowledged on this connection, kept to
    /// elide redundant GROUP round-trips.
    current_group: Option<GroupStatus>,
    state: ConnState,
    server: String,
}

impl NntpConnection {
    /// Open a socket to the server, read the greeting and authenticate
    /// if credentials are configured. The TLS connector is shared
    /// across all connections of one server so sessions can be resumed.
    pub async fn connect(
        config: &ServerConfig,
        tls_connector: Option<Arc<TlsConnector>>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);

        let tcp_stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: CONNECT_TIMEOUT.as_secs(),
            })?
            .map_err(|e| NntpError::ConnectionFailed {
                server: config.host.clone(),
                port: config.port,
                source: e,
            })?;

        tcp_stream.set_nodelay(true).map_err(NntpError::Io)?;
        SockRef::from(&tcp_stream)
            .set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))
            .map_err(NntpError::Io)?;

        let (reader, writer): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncWrite + Unpin + Send>,
        ) = if config.tls {
            let connector = tls_connector
                .ok_or_else(|| NntpError::Tls("TLS requested but no connector built".into()))?;
            let name = ServerName::try_from(config.host.clone())
                .map_err(|_| NntpError::Tls(format!("invalid server name: {}", config.host)))?;

            let tls_stream = timeout(CONNECT_TIMEOUT, connector.connect(name, tcp_stream))
                .await
                .map_err(|_| NntpError::Timeout {
                    seconds: CONNECT_TIMEOUT.as_secs(),
                })?
                .map_err(|e| NntpError::Tls(e.to_string()))?;

            let (read_half, write_half) = tokio::io::split(tls_stream);
            (Box::new(read_half), Box::new(write_half))
        } else {
            let (read_half, write_half) = tokio::io::split(tcp_stream);
            (Box::new(read_half), Box::new(write_half))
        };

        let reader = BufReader::with_capacity(256 * 1024, reader);

        let mut conn = Self {
            writer,
            reader,
            current_group: None,
            state: ConnState::InCommand,
            server: config.host.clone(),
        };

        let greeting = conn.read_response().await?;
        if !greeting.starts_with("200") && !greeting.starts_with("201") {
            return Err(NntpError::Protocol(format!("unexpected greeting: {}", greeting)).into());
        }
        conn.state = ConnState::Ready;

        if let Some(auth) = &config.auth {
            conn.authenticate(auth).await?;
        }

        tracing::debug!(server = %conn.server, tls = config.tls, "connection established");
        Ok(conn)
    }

    async fn authenticate(&mut self, auth: &AuthConfig) -> Result<()> {
        let response = self
            .command(&format!("AUTHINFO USER {}", auth.user))
            .await?;

        if response.starts_with("381") {
            let response = self
                .command(&format!("AUTHINFO PASS {}", auth.password))
                .await?;
            if !response.starts_with("281") {
                return Err(NntpError::AuthFailed(sanitize_response(&response)).into());
            }
        } else if !response.starts_with("281") {
            return Err(NntpError::AuthFailed(sanitize_response(&response)).into());
        }

        Ok(())
    }

    /// True when the connection can accept another command. The pool's
    /// validity predicate.
    pub fn is_ready(&self) -> bool {
        self.state == ConnState::Ready
    }

    /// Select `group`, skipping the round-trip when the server already
    /// has it selected on this connection.
    pub async fn select_group(&mut self, group: &str) -> Result<GroupStatus> {
        if let Some(current) = &self.current_group {
            if current.name == group {
                return Ok(current.clone());
            }
        }

        let response = self.command(&format!("GROUP {}", group)).await?;
        if !response.starts_with("211") {
            return Err(NntpError::GroupNotFound {
                group: group.to_string(),
                response,
            }
            .into());
        }
        let status = parse_group_response(&response)
            .ok_or_else(|| NntpError::Protocol(format!("malformed 211 response: {}", response)))?;
        tracing::debug!(
            server = %self.server,
            group,
            low = status.low,
            high = status.high,
            "group selected"
        );
        self.current_group = Some(status.clone());
        Ok(status)
    }

    /// Try each group in order; the first one the server accepts wins.
    /// If every selection fails the last failure is returned.
    pub async fn select_groups(&mut self, groups: &[String]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        if let Some(current) = &self.current_group {
            if groups.iter().any(|g| *g == current.name) {
                return Ok(());
            }
        }

        let mut last_err = None;
        for group in groups {
            match self.select_group(group).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if !self.is_ready() {
                        // Transport failure: no point trying the rest.
                        return Err(e);
                    }
                    tracing::debug!(group, error = %e, "group not selectable, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one group attempted"))
    }

    /// Fetch the headers of an article without its body.
    pub async fn head(&mut self, message_id: &str) -> Result<Vec<(String, String)>> {
        let response = self.command(&format!("HEAD <{}>", message_id)).await?;
        if !response.starts_with("221") {
            return Err(NntpError::ArticleNotFound {
                message_id: message_id.to_string(),
                response,
            }
            .into());
        }

        self.state = ConnState::InCommand;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            match timeout(RESPONSE_TIMEOUT, self.reader.read_line(&mut line)).await {
                Err(_) => {
                    self.state = ConnState::Broken;
                    return Err(NntpError::Timeout {
                        seconds: RESPONSE_TIMEOUT.as_secs(),
                    }
                    .into());
                }
                Ok(Err(e)) => {
                    self.state = ConnState::Broken;
                    return Err(NntpError::Io(e).into());
                }
                Ok(Ok(0)) => {
                    self.state = ConnState::Broken;
                    return Err(NntpError::UnexpectedEof.into());
                }
                Ok(Ok(_)) => {}
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed == "." {
                break;
            }
            let trimmed = if trimmed.starts_with("..") {
                &trimmed[1..]
            } else {
                trimmed
            };

            if trimmed.starts_with([' ', '\t']) {
                // Folded header: continuation of the previous value.
                if let Some(last) = headers.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(trimmed.trim_start());
                }
                continue;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        self.state = ConnState::Ready;
        Ok(headers)
    }

    /// Fetch an article body and stream it through the yEnc decoder
    /// into `sink`. The body is always consumed through the dot
    /// terminator unless the transport fails, so a decode error leaves
    /// the connection reusable.
    pub async fn body(&mut self, message_id: &str, sink: &dyn SinkWrite) -> Result<Decoded> {
        let response = self.command(&format!("BODY <{}>", message_id)).await?;
        if !response.starts_with("222") {
            return Err(NntpError::ArticleNotFound {
                message_id: message_id.to_string(),
                response,
            }
            .into());
        }

        self.state = ConnState::InCommand;
        match timeout(BODY_TIMEOUT, yenc::decode(sink, &mut self.reader)).await {
            Err(_) => {
                self.state = ConnState::Broken;
                Err(NntpError::Timeout {
                    seconds: BODY_TIMEOUT.as_secs(),
                }
                .into())
            }
            Ok(Err(DecodeError::Io(e))) => {
                self.state = ConnState::Broken;
                Err(DecodeError::Io(e).into())
            }
            Ok(Err(e)) => {
                // Frame-level failure: the decoder drained the body.
                self.state = ConnState::Ready;
                Err(e.into())
            }
            Ok(Ok(decoded)) => {
                self.state = ConnState::Ready;
                Ok(decoded)
            }
        }
    }

    async fn command(&mut self, line: &str) -> Result<String> {
        self.state = ConnState::InCommand;
        self.send(line).await?;
        let response = self.read_response().await?;
        self.state = ConnState::Ready;
        Ok(response)
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let res = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = res {
            self.state = ConnState::Broken;
            return Err(NntpError::Io(e).into());
        }
        Ok(())
    }

    async fn read_response(&mut self) -> Result<String> {
        let mut response = String::new();
        match timeout(RESPONSE_TIMEOUT, self.reader.read_line(&mut response)).await {
            Err(_) => {
                self.state = ConnState::Broken;
                Err(NntpError::Timeout {
                    seconds: RESPONSE_TIMEOUT.as_secs(),
                }
                .into())
            }
            Ok(Err(e)) => {
                self.state = ConnState::Broken;
                Err(NntpError::Io(e).into())
            }
            Ok(Ok(0)) => {
                self.state = ConnState::Broken;
                Err(NntpError::UnexpectedEof.into())
            }
            Ok(Ok(_)) => {
                while response.ends_with('\n') || response.ends_with('\r') {
                    response.pop();
                }
                Ok(response)
            }
        }
    }
}

/// Keep auth failures terse: status code only, never the server's
/// free-form text (it can echo credentials).
fn sanitize_response(response: &str) -> String {
    response
        .split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_string()
}

fn parse_group_response(response: &str) -> Option<GroupStatus> {
    let mut parts = response.split_whitespace();
    if parts.next()? != "211" {
        return None;
    }
    let count = parts.next()?.parse().ok()?;
    let low = parts.next()?.parse().ok()?;
    let high = parts.next()?.parse().ok()?;
    let name = parts.next()?.to_string();
    Some(GroupStatus {
        name,
        count,
        low,
        high,
    })
}
