//! Resumable single-object transfer.
//!
//! Probes the server with HEAD, then either streams the whole body (no range
//! support) or continues from the byte length already on disk with Range
//! GETs. A server that advertises ranges but answers a Range request with a
//! plain 200 gets a whole-file overwrite instead, so the destination is never
//! corrupted by appending a full body to a partial prefix.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::transport::{Timeouts, Transport};

/// Outcome of one completed transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRecord {
    /// Wall seconds summed across all network calls (HEAD included).
    pub elapsed_s: f64,
    /// Bytes this call wrote to the destination.
    pub bytes_written: u64,
    /// True iff the transfer went through the Range path.
    pub used_range: bool,
    /// True iff a non-empty prefix existed on disk at entry.
    pub retried: bool,
}

/// Download `url` into `dst`, continuing a partial file when possible.
///
/// Transport errors after the HEAD propagate to the caller without touching
/// whatever prefix is already on disk; a later call resumes from it.
pub async fn transfer(
    transport: Arc<dyn Transport>,
    url: &str,
    dst: &Path,
) -> Result<TransferRecord> {
    // A failed HEAD is not fatal: treat the server as range-less and let the
    // plain GET decide.
    let head_started = std::time::Instant::now();
    let head = {
        let t = Arc::clone(&transport);
        let u = url.to_string();
        blocking(move || t.head(&u, Timeouts::head())).await
    };
    let mut elapsed_s = head_started.elapsed().as_secs_f64();
    let (accept_ranges, content_length) = match head {
        Ok(h) => (h.accept_ranges, h.content_length),
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD failed; assuming no range support");
            (false, None)
        }
    };

    let existed = std::fs::metadata(dst).map(|m| m.len()).unwrap_or(0);
    let retried = existed > 0;

    if !accept_ranges {
        let whole = get_whole(&transport, url, dst).await?;
        return Ok(TransferRecord {
            elapsed_s: elapsed_s + whole.0,
            bytes_written: whole.1,
            used_range: false,
            retried,
        });
    }

    let mut offset = match content_length {
        Some(len) if existed > len => {
            // Local file is longer than the remote object: stale leftover.
            std::fs::remove_file(dst)
                .with_context(|| format!("remove oversized partial: {}", dst.display()))?;
            0
        }
        _ => existed,
    };

    let mut bytes_written = 0u64;
    while content_length.map_or(true, |len| offset < len) {
        let chunk = {
            let t = Arc::clone(&transport);
            let u = url.to_string();
            let d = dst.to_path_buf();
            blocking(move || t.get_range_append(&u, &d, offset, None, Timeouts::bulk())).await?
        };
        elapsed_s += chunk.elapsed_s;

        match chunk.status {
            206 => {
                offset += chunk.size;
                bytes_written += chunk.size;
                if chunk.size == 0 {
                    break;
                }
            }
            200 => {
                // Server ignored the Range header; the only safe continuation
                // is a fresh whole-file overwrite.
                tracing::debug!(url, "server ignored Range; overwriting whole file");
                let whole = get_whole(&transport, url, dst).await?;
                return Ok(TransferRecord {
                    elapsed_s: elapsed_s + whole.0,
                    bytes_written: whole.1,
                    used_range: true,
                    retried,
                });
            }
            status => anyhow::bail!("range GET {} returned HTTP {}", url, status),
        }
    }

    Ok(TransferRecord {
        elapsed_s,
        bytes_written,
        used_range: true,
        retried,
    })
}

async fn get_whole(
    transport: &Arc<dyn Transport>,
    url: &str,
    dst: &Path,
) -> Result<(f64, u64)> {
    let t = Arc::clone(transport);
    let u = url.to_string();
    let d: PathBuf = dst.to_path_buf();
    let body = blocking(move || t.get_whole(&u, &d, Timeouts::bulk())).await?;
    Ok((body.elapsed_s, body.size))
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .context("transport worker join")?
}
