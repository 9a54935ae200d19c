//! libcurl-backed [`Transport`] implementation.
//!
//! One easy handle per call, redirects followed, timeouts from the caller.
//! Runs on the current thread; call from `spawn_blocking` when used from
//! async code.

use anyhow::{Context, Result};
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str;
use std::time::Instant;

use super::{parse_head, parse_status_line, BodyResult, HeadResult, Timeouts, Transport};

/// Production transport backed by the curl crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurlTransport;

impl CurlTransport {
    pub fn new() -> Self {
        Self
    }

    fn easy(&self, url: &str, timeouts: Timeouts) -> Result<curl::easy::Easy> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url).context("invalid URL")?;
        easy.follow_location(true)?;
        easy.connect_timeout(timeouts.connect)?;
        easy.timeout(timeouts.total)?;
        Ok(easy)
    }
}

impl Transport for CurlTransport {
    fn head(&self, url: &str, timeouts: Timeouts) -> Result<HeadResult> {
        let mut easy = self.easy(url, timeouts)?;
        easy.nobody(true)?;

        let lines = RefCell::new(Vec::<String>::new());
        let status = Cell::new(0u32);
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    if let Some(code) = parse_status_line(s) {
                        status.set(code);
                        // Redirect hop: discard the previous hop's headers.
                        lines.borrow_mut().clear();
                    }
                    lines.borrow_mut().push(s.trim_end().to_string());
                }
                true
            })?;
            transfer
                .perform()
                .with_context(|| format!("HEAD {} failed", url))?;
        }

        let code = status.get();
        if !(200..300).contains(&code) {
            anyhow::bail!("HEAD {} returned HTTP {}", url, code);
        }
        Ok(parse_head(code, &lines.into_inner()))
    }

    fn get_whole(&self, url: &str, dst: &Path, timeouts: Timeouts) -> Result<BodyResult> {
        let part = part_path(dst);
        let file = File::create(&part)
            .with_context(|| format!("create temp file: {}", part.display()))?;

        let out = perform_get(self.easy(url, timeouts)?, file, None);
        let out = match out {
            Ok(o) => o,
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                return Err(e.context(format!("GET {} failed", url)));
            }
        };

        if !(200..300).contains(&out.status) {
            let _ = std::fs::remove_file(&part);
            anyhow::bail!("GET {} returned HTTP {}", url, out.status);
        }
        std::fs::rename(&part, dst)
            .with_context(|| format!("rename {} to {}", part.display(), dst.display()))?;
        Ok(out)
    }

    fn get_range_append(
        &self,
        url: &str,
        dst: &Path,
        start: u64,
        end: Option<u64>,
        timeouts: Timeouts,
    ) -> Result<BodyResult> {
        let mut easy = self.easy(url, timeouts)?;
        let range = match end {
            Some(end) => format!("{}-{}", start, end),
            None => format!("{}-", start),
        };
        easy.range(&range)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dst)
            .with_context(|| format!("open for append: {}", dst.display()))?;

        // Only a 206 body may be appended; anything else is aborted unwritten
        // so a stale prefix in `dst` survives intact.
        perform_get(easy, file, Some(206))
            .with_context(|| format!("range GET {} ({}) failed", url, range))
    }
}

/// Temp-file sibling used for atomic whole-file overwrites.
fn part_path(dst: &Path) -> std::path::PathBuf {
    let mut name = dst.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dst.with_file_name(name)
}

/// Run a body-carrying GET on `easy`, writing to `file`.
///
/// When `accept_only` is set and the final status differs, the body is
/// aborted before the first write and the result carries `size: 0` with the
/// observed status (no error). Transport-level failures are returned as-is.
fn perform_get(
    mut easy: curl::easy::Easy,
    file: File,
    accept_only: Option<u32>,
) -> Result<BodyResult> {
    let lines = RefCell::new(Vec::<String>::new());
    let status = Cell::new(0u32);
    let written = Cell::new(0u64);
    let rejected = Cell::new(false);
    let file = RefCell::new(file);
    let io_error: RefCell<Option<std::io::Error>> = RefCell::new(None);

    let started = Instant::now();
    let perform_result = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                if let Some(code) = parse_status_line(s) {
                    status.set(code);
                    lines.borrow_mut().clear();
                }
                lines.borrow_mut().push(s.trim_end().to_string());
            }
            true
        })?;
        transfer.write_function(|data| {
            if let Some(want) = accept_only {
                if status.get() != want {
                    rejected.set(true);
                    return Ok(0);
                }
            }
            match file.borrow_mut().write_all(data) {
                Ok(()) => {
                    written.set(written.get() + data.len() as u64);
                    Ok(data.len())
                }
                Err(e) => {
                    io_error.borrow_mut().replace(e);
                    Ok(0)
                }
            }
        })?;
        transfer.perform()
    };
    let elapsed_s = started.elapsed().as_secs_f64();

    if let Err(e) = perform_result {
        if e.is_write_error() {
            if let Some(io_err) = io_error.borrow_mut().take() {
                return Err(anyhow::Error::new(io_err).context("destination write failed"));
            }
            if rejected.get() {
                // Unexpected status; body dropped unwritten. Report it to the
                // caller instead of surfacing curl's aborted-by-callback error.
                return Ok(BodyResult {
                    status: status.get(),
                    elapsed_s,
                    size: 0,
                    headers: super::header_map(&lines.into_inner()),
                });
            }
        }
        return Err(anyhow::Error::new(e));
    }

    file.borrow_mut().flush().context("flush destination")?;
    Ok(BodyResult {
        status: status.get(),
        elapsed_s,
        size: written.get(),
        headers: super::header_map(&lines.into_inner()),
    })
}
