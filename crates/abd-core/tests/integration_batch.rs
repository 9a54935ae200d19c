//! Integration tests: full batch orchestration with a scripted transport and
//! a flipping link provider. The transport fabricates throughput (fast for
//! the first URLs, degraded afterwards) so the detector and the migration
//! protocol run deterministically without a real network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abd_core::batch::{run_batch, BatchContext, Mode};
use abd_core::config::AbdConfig;
use abd_core::link::LinkProvider;
use abd_core::transport::{BodyResult, HeadResult, Timeouts, Transport};
use anyhow::Result;
use tempfile::tempdir;

const OBJECT_BYTES: u64 = 100 * 1024;
/// 100 KiB in 0.5 s → 200 kB/s.
const FAST_ELAPSED_S: f64 = 0.5;
/// 100 KiB in 20 s → 5 kB/s.
const SLOW_ELAPSED_S: f64 = 20.0;

/// Transport that serves `OBJECT_BYTES` per URL with scripted throughput:
/// URLs up to `fast_until_index` report fast transfers, later ones report
/// degraded throughput and take real wall time so the batch overlaps the
/// migration protocol the way a live degraded link would.
struct DegradingTransport {
    fast_until_index: usize,
}

fn url_index(url: &str) -> usize {
    url.rsplit('/')
        .next()
        .and_then(|name| name.strip_prefix("img_"))
        .and_then(|rest| rest.strip_suffix(".jpg"))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

impl Transport for DegradingTransport {
    fn head(&self, _url: &str, _t: Timeouts) -> Result<HeadResult> {
        Ok(HeadResult {
            status: 200,
            headers: HashMap::new(),
            accept_ranges: true,
            content_length: Some(OBJECT_BYTES),
            etag: None,
            last_modified: None,
        })
    }

    fn get_whole(&self, url: &str, dst: &Path, t: Timeouts) -> Result<BodyResult> {
        self.get_range_append(url, dst, 0, None, t)
    }

    fn get_range_append(
        &self,
        url: &str,
        dst: &Path,
        start: u64,
        end: Option<u64>,
        _t: Timeouts,
    ) -> Result<BodyResult> {
        use std::io::Write;

        if end == Some(0) {
            // 1-byte probe.
            std::fs::write(dst, [0u8])?;
            return Ok(BodyResult {
                status: 206,
                elapsed_s: 0.02,
                size: 1,
                headers: HashMap::new(),
            });
        }

        let fast = url_index(url) <= self.fast_until_index;
        if !fast {
            std::thread::sleep(Duration::from_millis(250));
        }
        let body = vec![0xA5u8; (OBJECT_BYTES - start.min(OBJECT_BYTES)) as usize];
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dst)?;
        f.write_all(&body)?;
        Ok(BodyResult {
            status: 206,
            elapsed_s: if fast { FAST_ELAPSED_S } else { SLOW_ELAPSED_S },
            size: body.len() as u64,
            headers: HashMap::new(),
        })
    }
}

/// Link provider whose default net id flips after the settings UI is opened.
struct FlippingLink {
    opened: AtomicBool,
}

impl FlippingLink {
    fn new() -> Self {
        Self {
            opened: AtomicBool::new(false),
        }
    }
}

impl LinkProvider for FlippingLink {
    fn default_net_id(&self) -> u64 {
        if self.opened.load(Ordering::SeqCst) {
            2
        } else {
            1
        }
    }

    fn open_link_settings(&self) -> bool {
        self.opened.store(true, Ordering::SeqCst);
        true
    }
}

fn context(transport: Arc<dyn Transport>, link: Arc<dyn LinkProvider>, dir: &Path) -> BatchContext {
    BatchContext::new(transport, link, dir.to_path_buf())
}

#[tokio::test]
async fn auto_switch_migrates_once_and_tags_later_files_cell() {
    let dir = tempdir().unwrap();
    let transport: Arc<dyn Transport> = Arc::new(DegradingTransport {
        fast_until_index: 10,
    });
    let link = Arc::new(FlippingLink::new());
    let ctx = context(transport, link.clone(), dir.path());
    let cfg = AbdConfig::default();

    let report = run_batch(&cfg, "http://mock.test/set/", 30, Mode::AutoSwitch, &ctx)
        .await
        .expect("run_batch");

    assert_eq!(report.count, 30);
    assert_eq!(report.per_file.len(), 30);
    assert_eq!(report.mode, "AUTO_SWITCH");

    // Results sit at their original URL index regardless of completion order.
    for (i, record) in report.per_file.iter().enumerate() {
        assert!(record.url.ends_with(&format!("img_{:03}.jpg", i + 1)));
        assert!(record.t >= 0.0, "url {} should have succeeded", record.url);
    }
    assert_eq!(report.total_bytes, 30 * OBJECT_BYTES);

    // Degradation starts at sample 11; the verdict needs a few samples to
    // accumulate but must land before sample 20.
    assert!(
        (10..=20).contains(&report.weak_detect_index),
        "weak_detect_index = {}",
        report.weak_detect_index
    );
    assert!(report.switch_trigger_ts > 0);
    assert!(link.opened.load(Ordering::SeqCst));

    // The link poll runs at 1 s, so a successful switch pauses >= 1 s.
    assert!(report.paused_ms >= 1000, "paused_ms = {}", report.paused_ms);
    let expected_total = (report.wall_time - report.paused_ms as f64 / 1000.0).max(0.0);
    assert!((report.total_time - expected_total).abs() < 1e-9);

    let cell: Vec<usize> = report
        .per_file
        .iter()
        .enumerate()
        .filter(|(_, r)| r.path == "cell")
        .map(|(i, _)| i)
        .collect();
    assert!(!cell.is_empty(), "some transfers must finish on the new link");
    for i in &cell {
        assert!(
            *i as i64 > report.weak_detect_index,
            "cell record {} before detection index {}",
            i,
            report.weak_detect_index
        );
    }

    // Every object landed on disk in full.
    for i in 1..=30 {
        let path = dir.path().join(format!("img_{:03}.jpg", i));
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            OBJECT_BYTES,
            "file {} incomplete",
            i
        );
    }

    assert_eq!(report.scheduler.before, 3);
    assert_eq!(report.scheduler.weak, 2);
    assert_eq!(report.scheduler.after, 8);
    // 30 tasks at the default interval of 10 → probes at 10, 20, 30.
    assert_eq!(report.probes.count, 3);
}

#[tokio::test]
async fn wifi_only_never_migrates_even_when_degraded() {
    let dir = tempdir().unwrap();
    let transport: Arc<dyn Transport> = Arc::new(DegradingTransport {
        fast_until_index: 10,
    });
    let link = Arc::new(FlippingLink::new());
    let ctx = context(transport, link.clone(), dir.path());
    let cfg = AbdConfig::default();

    let report = run_batch(&cfg, "http://mock.test/set", 24, Mode::WifiOnly, &ctx)
        .await
        .expect("run_batch");

    assert_eq!(report.mode, "WIFI_ONLY");
    assert_eq!(report.weak_detect_index, -1);
    assert_eq!(report.switch_trigger_ts, 0);
    assert_eq!(report.paused_ms, 0);
    assert!(!link.opened.load(Ordering::SeqCst));
    assert!(report.per_file.iter().all(|r| r.path == "wifi"));
    assert!((report.total_time - report.wall_time).abs() < 1e-9);
}

#[tokio::test]
async fn fast_batch_keeps_url_order_in_results() {
    let dir = tempdir().unwrap();
    let transport: Arc<dyn Transport> = Arc::new(DegradingTransport {
        fast_until_index: usize::MAX,
    });
    let link = Arc::new(FlippingLink::new());
    let ctx = context(transport, link, dir.path());
    let cfg = AbdConfig::default();

    let report = run_batch(&cfg, "http://mock.test/set", 12, Mode::AutoSwitch, &ctx)
        .await
        .expect("run_batch");

    assert_eq!(report.per_file.len(), 12);
    for (i, record) in report.per_file.iter().enumerate() {
        assert!(record.url.ends_with(&format!("img_{:03}.jpg", i + 1)));
        assert_eq!(record.bytes, OBJECT_BYTES);
        assert!(record.used_range);
        assert!(!record.retried);
    }
    assert_eq!(report.weak_detect_index, -1);
}

#[tokio::test]
async fn zero_count_is_rejected() {
    let dir = tempdir().unwrap();
    let transport: Arc<dyn Transport> = Arc::new(DegradingTransport {
        fast_until_index: usize::MAX,
    });
    let link = Arc::new(FlippingLink::new());
    let ctx = context(transport, link, dir.path());
    let cfg = AbdConfig::default();

    let err = run_batch(&cfg, "http://mock.test/set", 0, Mode::AutoSwitch, &ctx).await;
    assert!(err.is_err());
}
