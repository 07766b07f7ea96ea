//! Test support: an in-process NNTP server and a yEnc encoder for
//! building article fixtures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// yEnc-encode `data` into payload lines: +42 mod 256, critical bytes
/// escaped, wrapped at `width`, leading dots stuffed, CRLF endings.
fn encode_payload(data: &[u8], width: usize) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = vec![Vec::new()];
    for &b in data {
        if lines.last().unwrap().len() >= width {
            lines.push(Vec::new());
        }
        let line = lines.last_mut().unwrap();
        let e = b.wrapping_add(42);
        match e {
            0x00 | 0x0A | 0x0D | 0x3D => {
                line.push(b'=');
                line.push(e.wrapping_add(64));
            }
            _ => line.push(e),
        }
    }
    let mut out = Vec::new();
    for line in lines {
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(&line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Build a complete article body (dot terminator included). `part` is
/// `(begin, end, total_size)` with 1-based inclusive offsets for a
/// multi-part article; `None` builds a single-part frame.
pub fn yenc_article(payload: &[u8], part: Option<(u64, u64, u64)>) -> Vec<u8> {
    yenc_article_with_crc(payload, part, crc32fast::hash(payload))
}

/// Same as [`yenc_article`] but with a deliberately wrong CRC.
pub fn yenc_article_bad_crc(payload: &[u8]) -> Vec<u8> {
    yenc_article_with_crc(payload, None, crc32fast::hash(payload) ^ 1)
}

fn yenc_article_with_crc(payload: &[u8], part: Option<(u64, u64, u64)>, crc: u32) -> Vec<u8> {
    let mut out = Vec::new();
    match part {
        Some((begin, end, total)) => {
            out.extend_from_slice(
                format!("=ybegin part=1 line=128 size={} name=mock.bin\r\n", total).as_bytes(),
            );
            out.extend_from_slice(format!("=ypart begin={} end={}\r\n", begin, end).as_bytes());
        }
        None => {
            out.extend_from_slice(
                format!("=ybegin line=128 size={} name=mock.bin\r\n", payload.len()).as_bytes(),
            );
        }
    }
    out.extend_from_slice(&encode_payload(payload, 128));
    match part {
        Some(_) => out.extend_from_slice(
            format!("=yend size={} pcrc32={:08x}\r\n", payload.len(), crc).as_bytes(),
        ),
        None => out.extend_from_slice(
            format!("=yend size={} crc32={:08x}\r\n", payload.len(), crc).as_bytes(),
        ),
    }
    out.extend_from_slice(b".\r\n");
    out
}

/// Render an NZB document: one entry per file as
/// `(subject, [(message_id, bytes), ...])`, all in one test group.
pub fn nzb_xml(files: &[(&str, &[(&str, u64)])]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );
    for (subject, segments) in files {
        xml.push_str(&format!(
            "  <file poster=\"tester@example.com\" date=\"1700000000\" subject=\"{}\">\n",
            subject.replace('"', "&quot;")
        ));
        xml.push_str("    <groups>\n      <group>alt.binaries.test</group>\n    </groups>\n");
        xml.push_str("    <segments>\n");
        for (number, (id, bytes)) in segments.iter().enumerate() {
            xml.push_str(&format!(
                "      <segment bytes=\"{}\" number=\"{}\">{}</segment>\n",
                bytes,
                number + 1,
                id
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

struct MockState {
    articles: HashMap<String, Vec<u8>>,
    known_groups: Option<Vec<String>>,
    body_delay: Option<Duration>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Minimal NNTP server: greeting, AUTHINFO, GROUP, HEAD, BODY, QUIT.
/// Tracks how many sockets are open at once.
pub struct MockServer {
    port: u16,
    state: Arc<MockState>,
}

pub struct MockServerBuilder {
    articles: HashMap<String, Vec<u8>>,
    known_groups: Option<Vec<String>>,
    body_delay: Option<Duration>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            articles: HashMap::new(),
            known_groups: None,
            body_delay: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn open_connections(&self) -> usize {
        self.state.current.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

impl MockServerBuilder {
    pub fn article(mut self, id: &str, body: Vec<u8>) -> Self {
        self.articles.insert(id.to_string(), body);
        self
    }

    /// Restrict GROUP to the given names; everything else gets a 411.
    /// Without this every group selects fine.
    pub fn known_groups(mut self, groups: &[&str]) -> Self {
        self.known_groups = Some(groups.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = Some(delay);
        self
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(MockState {
            articles: self.articles,
            known_groups: self.known_groups,
            body_delay: self.body_delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let open = state.current.fetch_add(1, Ordering::SeqCst) + 1;
                    state.peak.fetch_max(open, Ordering::SeqCst);
                    let _ = serve(stream, &state).await;
                    state.current.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        MockServer { port, state }
    }
}

async fn serve(stream: TcpStream, state: &MockState) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer.write_all(b"200 mock news server ready\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let cmd = line.trim_end();

        if cmd.starts_with("AUTHINFO USER ") {
            writer.write_all(b"381 password required\r\n").await?;
        } else if cmd.starts_with("AUTHINFO PASS ") {
            writer.write_all(b"281 authentication accepted\r\n").await?;
        } else if let Some(group) = cmd.strip_prefix("GROUP ") {
            let known = state
                .known_groups
                .as_ref()
                .map(|groups| groups.iter().any(|g| g == group))
                .unwrap_or(true);
            if known {
                writer
                    .write_all(format!("211 100 1 100 {}\r\n", group).as_bytes())
                    .await?;
            } else {
                writer.write_all(b"411 no such news group\r\n").await?;
            }
        } else if let Some(id) = cmd.strip_prefix("BODY ") {
            let id = id.trim_start_matches('<').trim_end_matches('>');
            match state.articles.get(id) {
                Some(body) => {
                    if let Some(delay) = state.body_delay {
                        tokio::time::sleep(delay).await;
                    }
                    writer
                        .write_all(format!("222 0 <{}>\r\n", id).as_bytes())
                        .await?;
                    writer.write_all(body).await?;
                    writer.flush().await?;
                }
                None => writer.write_all(b"430 no such article\r\n").await?,
            }
        } else if let Some(id) = cmd.strip_prefix("HEAD ") {
            let id = id.trim_start_matches('<').trim_end_matches('>');
            if state.articles.contains_key(id) {
                writer
                    .write_all(format!("221 0 <{}>\r\n", id).as_bytes())
                    .await?;
                writer
                    .write_all(
                        format!("Subject: mock article\r\nMessage-ID: <{}>\r\n.\r\n", id)
                            .as_bytes(),
                    )
                    .await?;
            } else {
                writer.write_all(b"430 no such article\r\n").await?;
            }
        } else if cmd == "QUIT" {
            writer.write_all(b"205 goodbye\r\n").await?;
            return Ok(());
        } else {
            writer.write_all(b"500 command not recognized\r\n").await?;
        }
    }
}
