//! Minimum-cost link probing.
//!
//! Every N-th task issues a 1-byte Range GET (`bytes=0-0`) against a sample
//! URL so the detector keeps seeing the link even when bulk transfers stall.
//! Probe bodies land in a scratch file that is deleted best-effort; probe
//! failures are swallowed, but count and cost are always accumulated so the
//! overhead stays visible in the report.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::transport::{Timeouts, Transport};

/// Probe counters, serialized into the batch report.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ProbeSnapshot {
    pub count: u64,
    #[serde(rename = "costMs")]
    pub cost_ms: f64,
}

struct ProbeState {
    fast_until: Instant,
    count: u64,
    cost_ms: f64,
}

/// Periodic RTT prober. Shared across task bodies; internally locked.
pub struct LightProbe {
    transport: Arc<dyn Transport>,
    every_n: usize,
    scratch_dir: tempfile::TempDir,
    state: Mutex<ProbeState>,
}

impl LightProbe {
    /// `every_n` is clamped to ≥ 2 so the probe can never dominate a batch.
    pub fn new(transport: Arc<dyn Transport>, every_n: usize) -> Result<Self> {
        let scratch_dir = tempfile::tempdir().context("create probe scratch dir")?;
        Ok(Self {
            transport,
            every_n: every_n.max(2),
            scratch_dir,
            state: Mutex::new(ProbeState {
                fast_until: Instant::now(),
                count: 0,
                cost_ms: 0.0,
            }),
        })
    }

    /// Probe on every N-th index (halved interval while boosted). Returns
    /// whether a probe was issued. Never fails: probe errors are logged and
    /// swallowed so they cannot impair the batch.
    pub async fn maybe_probe(&self, index: usize, sample_url: &str) -> bool {
        let interval = {
            let state = self.state.lock().unwrap();
            if Instant::now() < state.fast_until {
                (self.every_n / 2).max(2)
            } else {
                self.every_n
            }
        };
        if index % interval != 0 {
            return false;
        }

        let scratch = self.scratch_path();
        let _ = std::fs::remove_file(&scratch);

        let started = Instant::now();
        let outcome = {
            let transport = Arc::clone(&self.transport);
            let url = sample_url.to_string();
            let dst = scratch.clone();
            tokio::task::spawn_blocking(move || {
                transport.get_range_append(&url, &dst, 0, Some(0), Timeouts::probe())
            })
            .await
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(url = sample_url, error = %e, "probe failed"),
            Err(e) => tracing::debug!(url = sample_url, error = %e, "probe worker died"),
        }
        let _ = std::fs::remove_file(&scratch);

        let mut state = self.state.lock().unwrap();
        state.count += 1;
        state.cost_ms += elapsed_ms;
        true
    }

    /// Halve the probe interval for `duration` (extends, never shortens, an
    /// active boost window).
    pub fn boost_short(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        let until = Instant::now() + duration;
        if until > state.fast_until {
            state.fast_until = until;
        }
    }

    pub fn snapshot(&self) -> ProbeSnapshot {
        let state = self.state.lock().unwrap();
        ProbeSnapshot {
            count: state.count,
            cost_ms: state.cost_ms,
        }
    }

    fn scratch_path(&self) -> PathBuf {
        self.scratch_dir.path().join("probe.bin")
    }
}
