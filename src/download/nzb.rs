use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{NzbError, NzbFetchError};

type Result<T> = std::result::Result<T, NzbFetchError>;

/// First double-quoted substring of a subject line, e.g.
/// `[1/9] - "archive.part01.rar" yEnc (1/5202)`. Handles the HTML
/// entity form some indexers emit.
static FILE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:&quot;|")([^"]+)(?:&quot;|")"#).expect("valid regex"));

/// One article of a file: an opaque message-id contributing `bytes`
/// encoded bytes at position `number` of the file's segment sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbSegment {
    #[serde(rename = "@bytes")]
    pub bytes: u64,
    #[serde(rename = "@number")]
    pub number: u32,
    /// Message-id without the enclosing angle brackets.
    #[serde(rename = "$text")]
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NzbGroups {
    #[serde(rename = "group", default)]
    pub group: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NzbSegments {
    #[serde(rename = "segment", default)]
    pub segment: Vec<NzbSegment>,
}

/// One logical binary in the index: the segments concatenated in
/// ascending `number` order produce the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NzbFile {
    #[serde(rename = "@poster", default)]
    pub poster: String,
    #[serde(rename = "@date", default)]
    pub date: u64,
    #[serde(rename = "@subject")]
    pub subject: String,
    #[serde(default)]
    pub groups: NzbGroups,
    #[serde(default)]
    pub segments: NzbSegments,
}

impl NzbFile {
    /// Destination file name: the first double-quoted substring of the
    /// subject, or the whole subject when it carries no quotes.
    pub fn file_name(&self) -> String {
        FILE_NAME_RE
            .captures(&self.subject)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| self.subject.clone())
    }

    /// Nominal encoded size: the sum of the segments' `bytes`.
    pub fn total_size(&self) -> u64 {
        self.segments.segment.iter().map(|s| s.bytes).sum()
    }
}

/// Parsed NZB index. File and segment order is preserved from the
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "nzb")]
pub struct Nzb {
    #[serde(rename = "file", default)]
    files: Vec<NzbFile>,
}

impl Nzb {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(NzbError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    fn parse_content(content: &str) -> Result<Self> {
        let nzb: Nzb = quick_xml::de::from_str(content)
            .map_err(|e| NzbError::ParseError(e.to_string()))?;
        if nzb.files.is_empty() {
            return Err(NzbError::EmptyNzb.into());
        }
        Ok(nzb)
    }

    /// Serialize back to XML. Used to check that parsing preserves
    /// file and segment ordering.
    pub fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|e| NzbError::ParseError(e.to_string()).into())
    }

    pub fn files(&self) -> &[NzbFile] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.total_size()).sum()
    }

    pub fn total_segments(&self) -> usize {
        self.files.iter().map(|f| f.segments.segment.len()).sum()
    }
}

impl FromStr for Nzb {
    type Err = NzbFetchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_content(s)
    }
}
