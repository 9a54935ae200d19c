//! HTTP transport contract consumed by the transfer and probe layers.
//!
//! Implementations are blocking (libcurl easy handles); async callers wrap the
//! calls in `tokio::task::spawn_blocking`. The core only ever reads two header
//! keys (`accept-ranges`, `content-length`); the map keeps everything the
//! server sent, lowercased, for diagnostics.

mod curl_impl;

pub use curl_impl::CurlTransport;

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Connect/total timeout pair for one HTTP operation.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub total: Duration,
}

impl Timeouts {
    /// Metadata probes: fail fast.
    pub fn head() -> Self {
        Self {
            connect: Duration::from_secs(15),
            total: Duration::from_secs(30),
        }
    }

    /// Bulk body transfers: generous read window for slow links.
    pub fn bulk() -> Self {
        Self {
            connect: Duration::from_secs(30),
            total: Duration::from_secs(600),
        }
    }

    /// 1-byte RTT probes must never stall the batch.
    pub fn probe() -> Self {
        Self {
            connect: Duration::from_secs(5),
            total: Duration::from_secs(5),
        }
    }
}

/// Parsed metadata from a HEAD request.
#[derive(Debug, Clone)]
pub struct HeadResult {
    /// Final HTTP status after redirects.
    pub status: u32,
    /// All response headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// True iff the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// Total size in bytes, if `Content-Length` was present and parseable.
    pub content_length: Option<u64>,
    /// `ETag` value if present.
    pub etag: Option<String>,
    /// `Last-Modified` value if present.
    pub last_modified: Option<String>,
}

/// Outcome of one body-carrying GET (whole or ranged).
#[derive(Debug, Clone)]
pub struct BodyResult {
    /// Final HTTP status after redirects.
    pub status: u32,
    /// Wall seconds spent inside the transport call.
    pub elapsed_s: f64,
    /// Bytes written to the destination by this call.
    pub size: u64,
    /// All response headers, names lowercased.
    pub headers: HashMap<String, String>,
}

/// Blocking HTTP primitives the downloader core is built on.
///
/// `get_range_append` appends to `dst` only when the server honors the Range
/// request with `206 Partial Content`. When the server ignores Range and
/// answers `200`, the implementation must abort the body without writing and
/// report `status: 200, size: 0` so the caller can fall back to a whole-file
/// overwrite without corrupting an existing prefix.
pub trait Transport: Send + Sync {
    fn head(&self, url: &str, timeouts: Timeouts) -> Result<HeadResult>;

    /// Full-body GET that atomically overwrites `dst` from offset 0.
    fn get_whole(&self, url: &str, dst: &Path, timeouts: Timeouts) -> Result<BodyResult>;

    /// Range GET `bytes=start-` (or `bytes=start-end` when `end` is given),
    /// appending the 206 body to `dst`.
    fn get_range_append(
        &self,
        url: &str,
        dst: &Path,
        start: u64,
        end: Option<u64>,
        timeouts: Timeouts,
    ) -> Result<BodyResult>;
}

/// Parse raw header lines (as collected by a curl header callback) into a
/// lowercased name → value map. Status lines and blanks are skipped; on
/// duplicate names the last value wins.
pub(crate) fn header_map(lines: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with("HTTP/") {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            map.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    map
}

/// Extract the status code from a raw status line ("HTTP/1.1 206 Partial Content").
pub(crate) fn parse_status_line(line: &str) -> Option<u32> {
    let line = line.trim();
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Build a `HeadResult` from collected header lines and the final status.
pub(crate) fn parse_head(status: u32, lines: &[String]) -> HeadResult {
    let headers = header_map(lines);
    let accept_ranges = headers
        .get("accept-ranges")
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    let content_length = headers.get("content-length").and_then(|v| v.parse().ok());
    let etag = headers.get("etag").map(|v| v.trim_matches('"').to_string());
    let last_modified = headers.get("last-modified").cloned();
    HeadResult {
        status,
        headers,
        accept_ranges,
        content_length,
        etag,
        last_modified,
    }
}
