//! Streaming yEnc decoder
//!
//! Decodes one article body straight into a positional sink, line by
//! line. Memory use is bounded by the longest input line: nothing of
//! the article is buffered beyond the line being decoded.
//!
//! Multi-part articles carry their own placement: `=ypart begin` is a
//! 1-based offset into the whole file, so part N of a binary can be
//! decoded without knowing anything about the other parts.

use std::collections::HashMap;
use std::io;

use crc32fast::Hasher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::DecodeError;
use crate::sink::SinkWrite;

/// Outcome of a successfully decoded article.
#[derive(Debug, Clone, Copy)]
pub struct Decoded {
    /// Absolute offset of the first decoded byte (0 for single-part).
    pub begin: u64,
    /// Number of bytes written to the sink.
    pub len: u64,
    /// CRC-32 (IEEE) of the decoded bytes.
    pub crc: u32,
}

/// Decode one yEnc article from `reader` into `sink`.
///
/// `reader` must be positioned at the first body line and is always
/// consumed through the NNTP terminator line (a lone `.`) unless an
/// I/O error cuts the stream short; on a parse or CRC error the stream
/// is drained first and the first error is returned afterwards, so the
/// underlying connection stays reusable.
pub async fn decode<R>(sink: &dyn SinkWrite, reader: &mut R) -> Result<Decoded, DecodeError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut out: Vec<u8> = Vec::with_capacity(1024);

    let mut header: Option<HashMap<String, String>> = None;
    let mut have_part = false;
    let mut done = false;
    let mut first_err: Option<DecodeError> = None;

    let mut crc = Hasher::new();
    let mut begin: u64 = 0;
    let mut offset: u64 = 0;
    let mut written: u64 = 0;
    // An `=` at the very end of a line escapes the first byte of the
    // next one, so the flag lives outside the line loop.
    let mut escape = false;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(DecodeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended before dot terminator",
            )));
        }

        // Tolerate CRLF and bare LF terminators.
        let mut end = line.len();
        if end > 0 && line[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        let raw = &line[..end];

        if raw == b"." {
            break;
        }
        // NNTP dot-stuffing: a leading ".." stands for ".".
        let raw = if raw.starts_with(b"..") { &raw[1..] } else { raw };

        // Once an error is recorded (or the trailer validated) the rest
        // of the body is consumed and discarded.
        if first_err.is_some() || done {
            continue;
        }

        if raw.starts_with(b"=ybegin ") {
            if header.is_some() {
                first_err = Some(DecodeError::MalformedFrame(
                    "duplicate =ybegin marker".into(),
                ));
                continue;
            }
            header = Some(parse_keywords(&String::from_utf8_lossy(&raw[8..])));
            continue;
        }

        if raw.starts_with(b"=ypart ") {
            if header.is_none() {
                first_err = Some(DecodeError::MalformedFrame("=ypart before =ybegin".into()));
                continue;
            }
            let part = parse_keywords(&String::from_utf8_lossy(&raw[7..]));
            have_part = true;
            if let Some(part_begin) = keyword_u64(&part, "begin") {
                // `begin` is 1-based inclusive.
                begin = part_begin.saturating_sub(1);
                offset = begin;
            }
            continue;
        }

        if raw.starts_with(b"=yend") {
            if header.is_none() {
                first_err = Some(DecodeError::MalformedFrame("=yend before =ybegin".into()));
                continue;
            }
            let rest = String::from_utf8_lossy(&raw[5..]);
            let trailer = parse_keywords(rest.trim_start());
            let crc_key = if have_part { "pcrc32" } else { "crc32" };
            match trailer.get(crc_key) {
                Some(hex) => match u32::from_str_radix(hex.trim(), 16) {
                    Ok(expected) => {
                        let actual = crc.clone().finalize();
                        if expected != actual {
                            first_err = Some(DecodeError::CrcMismatch { expected, actual });
                            continue;
                        }
                    }
                    Err(_) => {
                        first_err = Some(DecodeError::MalformedFrame(format!(
                            "unparseable {} in =yend: {}",
                            crc_key, hex
                        )));
                        continue;
                    }
                },
                // No CRC in the trailer: accept the part as-is.
                None => {}
            }
            done = true;
            continue;
        }

        // Anything before =ybegin is not part of the frame.
        if header.is_none() {
            continue;
        }

        out.clear();
        for &b in raw {
            if b == b'\r' || b == b'\n' {
                continue;
            }
            if b == 0x3D {
                escape = true;
                continue;
            }
            let mut v = b;
            if escape {
                escape = false;
                v = v.wrapping_sub(64);
            }
            out.push(v.wrapping_sub(42));
        }
        if !out.is_empty() {
            sink.write_at(offset, &out)?;
            crc.update(&out);
            offset += out.len() as u64;
            written += out.len() as u64;
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }
    if header.is_none() {
        return Err(DecodeError::MalformedFrame("missing =ybegin marker".into()));
    }
    if !done {
        return Err(DecodeError::MalformedFrame("missing =yend marker".into()));
    }

    Ok(Decoded {
        begin,
        len: written,
        crc: crc.finalize(),
    })
}

/// Parse the key/value pairs of a yEnc control line. Tokens split on
/// spaces, keys from values on the first `=`; `name` is always last
/// and absorbs the remainder of the line so embedded spaces survive.
fn parse_keywords(input: &str) -> HashMap<String, String> {
    let mut res = HashMap::new();
    let tokens: Vec<&str> = input.split(' ').collect();
    for (i, token) in tokens.iter().enumerate() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key == "name" {
            let mut name = value.to_string();
            for rest in &tokens[i + 1..] {
                name.push(' ');
                name.push_str(rest);
            }
            res.insert("name".to_string(), name);
            break;
        }
        res.insert(key.to_string(), value.to_string());
    }
    res
}

fn keyword_u64(map: &HashMap<String, String>, key: &str) -> Option<u64> {
    map.get(key).and_then(|v| v.trim().parse().ok())
}
