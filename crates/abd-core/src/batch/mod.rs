//! Batch orchestration.
//!
//! Enqueues every URL into the priority pool, routes transfer outcomes into
//! the weak-link detector, and on the first weak verdict drives the staged
//! migration: throttle the pool, drain small work, prompt for a link change,
//! wait for the default link to move, then resume wide. Per-URL failures are
//! recorded (`t = -1`) and fed to the detector but never abort the batch.

mod heuristic;
mod report;

pub use heuristic::{default_small_tag, SmallTag};
pub use report::{BatchReport, PerFileRecord, SchedulerInfo};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::AbdConfig;
use crate::detector::WeakLinkDetector;
use crate::link::LinkProvider;
use crate::pool::PriorityPool;
use crate::probe::LightProbe;
use crate::transfer;
use crate::transport::Transport;
use crate::url_model;

const DRAIN_POLL: Duration = Duration::from_millis(100);
const LINK_POLL: Duration = Duration::from_secs(1);
const LINK_WAIT_MAX: Duration = Duration::from_secs(120);
const PROBE_BOOST: Duration = Duration::from_millis(15_000);

/// Batch execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stay on the default link; the detector is fed but never acted on.
    WifiOnly,
    /// Enable the migration protocol.
    AutoSwitch,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::WifiOnly => "WIFI_ONLY",
            Mode::AutoSwitch => "AUTO_SWITCH",
        })
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "WIFI_ONLY" => Ok(Mode::WifiOnly),
            "AUTO_SWITCH" => Ok(Mode::AutoSwitch),
            other => anyhow::bail!("unknown mode: {}", other),
        }
    }
}

/// Injected collaborators for one batch.
pub struct BatchContext {
    pub transport: Arc<dyn Transport>,
    pub link: Arc<dyn LinkProvider>,
    pub download_dir: PathBuf,
    pub small_tag: SmallTag,
}

impl BatchContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        link: Arc<dyn LinkProvider>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            transport,
            link,
            download_dir,
            small_tag: default_small_tag(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MigrationState {
    Normal,
    Draining,
    Switched,
}

struct Migration {
    state: MigrationState,
    prompts_left: u32,
    paused_ms: u64,
    weak_detect_index: i64,
    switch_trigger_ts: i64,
}

/// State mutated from task bodies. Each structure carries its own lock; the
/// drain poll reads the pool while a task holds the migration entry, so a
/// single coarse lock would livelock.
struct Shared {
    detector: Mutex<WeakLinkDetector>,
    migration: Mutex<Migration>,
    records: Mutex<Vec<Option<PerFileRecord>>>,
}

#[derive(Clone)]
struct TaskEnv {
    shared: Arc<Shared>,
    pool: PriorityPool,
    probe: Arc<LightProbe>,
    transport: Arc<dyn Transport>,
    link: Arc<dyn LinkProvider>,
    mode: Mode,
    conc_weak: usize,
    conc_after: usize,
    download_dir: PathBuf,
}

/// Run one batch of `count` objects under `base_url`.
///
/// Returns the full report; per-URL failures are embedded, and only
/// configuration-level faults surface as errors.
pub async fn run_batch(
    cfg: &AbdConfig,
    base_url: &str,
    count: usize,
    mode: Mode,
    ctx: &BatchContext,
) -> Result<BatchReport> {
    cfg.validate()?;
    if count == 0 {
        anyhow::bail!("count must be positive");
    }
    std::fs::create_dir_all(&ctx.download_dir).with_context(|| {
        format!("create download dir: {}", ctx.download_dir.display())
    })?;

    let base = url_model::normalize_base(base_url);
    let urls = url_model::batch_urls(&base, count);

    let pool = PriorityPool::new(cfg.conc_before);
    let probe = Arc::new(LightProbe::new(
        Arc::clone(&ctx.transport),
        cfg.probe_every_n,
    )?);
    let shared = Arc::new(Shared {
        detector: Mutex::new(WeakLinkDetector::new(cfg.detector)),
        migration: Mutex::new(Migration {
            state: MigrationState::Normal,
            prompts_left: 1,
            paused_ms: 0,
            weak_detect_index: -1,
            switch_trigger_ts: 0,
        }),
        records: Mutex::new(vec![None; count]),
    });

    let env = TaskEnv {
        shared: Arc::clone(&shared),
        pool: pool.clone(),
        probe: Arc::clone(&probe),
        transport: Arc::clone(&ctx.transport),
        link: Arc::clone(&ctx.link),
        mode,
        conc_weak: cfg.conc_weak,
        conc_after: cfg.conc_after,
        download_dir: ctx.download_dir.clone(),
    };

    tracing::info!(count, mode = %mode, base = %base, "batch started");
    let wall_start = Instant::now();

    for (i, url) in urls.into_iter().enumerate() {
        let small = (ctx.small_tag)(&url);
        pool.push(run_url_task(env.clone(), i, url), small);
    }

    pool.idle().await;
    let wall_time = wall_start.elapsed().as_secs_f64();

    let mut per_file = Vec::with_capacity(count);
    for (i, slot) in shared.records.lock().unwrap().iter().enumerate() {
        match slot {
            Some(record) => per_file.push(record.clone()),
            None => anyhow::bail!("no record for url index {}", i),
        }
    }
    let total_bytes: u64 = per_file.iter().map(|r| r.bytes).sum();

    let migration = shared.migration.lock().unwrap();
    let total_time = (wall_time - migration.paused_ms as f64 / 1000.0).max(0.0);
    tracing::info!(
        wall_time,
        total_time,
        paused_ms = migration.paused_ms,
        total_bytes,
        "batch finished"
    );

    Ok(BatchReport {
        ts: epoch_ms(),
        base_url: base,
        count,
        mode: mode.to_string(),
        wall_time,
        paused_ms: migration.paused_ms,
        total_time,
        total_bytes,
        per_file,
        weak_detect_index: migration.weak_detect_index,
        switch_trigger_ts: migration.switch_trigger_ts,
        scheduler: SchedulerInfo {
            before: cfg.conc_before,
            weak: cfg.conc_weak,
            after: cfg.conc_after,
        },
        probes: probe.snapshot(),
    })
}

/// Body of one per-URL pool task.
async fn run_url_task(env: TaskEnv, index: usize, url: String) {
    let _ = env.probe.maybe_probe(index + 1, &url).await;

    let dst = env.download_dir.join(url_model::image_name(index + 1));
    let outcome = transfer::transfer(Arc::clone(&env.transport), &url, &dst).await;

    let verdict = match outcome {
        Ok(rec) => {
            let record = PerFileRecord {
                url: url.clone(),
                t: rec.elapsed_s,
                bytes: rec.bytes_written,
                path: current_path(&env.shared),
                used_range: rec.used_range,
                retried: rec.retried,
            };
            let speed_kbps = rec.bytes_written as f64 / 1024.0 / rec.elapsed_s.max(0.001);
            tracing::debug!(url = %url, speed_kbps, bytes = rec.bytes_written, "transfer done");
            env.shared.records.lock().unwrap()[index] = Some(record);
            env.shared.detector.lock().unwrap().feed(speed_kbps, None, true)
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "transfer failed");
            let record = PerFileRecord {
                url: url.clone(),
                t: -1.0,
                bytes: 0,
                path: current_path(&env.shared),
                used_range: false,
                retried: false,
            };
            env.shared.records.lock().unwrap()[index] = Some(record);
            env.shared.detector.lock().unwrap().feed(0.0, None, false)
        }
    };

    if env.mode == Mode::AutoSwitch && verdict.is_weak {
        migrate(&env, index, verdict.confidence).await;
    }
}

/// Link tag for a record completing now.
fn current_path(shared: &Shared) -> String {
    let state = shared.migration.lock().unwrap().state;
    if state == MigrationState::Switched {
        "cell".to_string()
    } else {
        "wifi".to_string()
    }
}

/// Staged migration, executed inside the task that observed the weak verdict.
/// The `Normal → Draining` claim under the migration lock serializes
/// concurrent verdicts; later ones return without side effects.
async fn migrate(env: &TaskEnv, index: usize, confidence: f64) {
    {
        let mut m = env.shared.migration.lock().unwrap();
        if m.state != MigrationState::Normal || m.prompts_left == 0 {
            return;
        }
        m.state = MigrationState::Draining;
        m.weak_detect_index = index as i64;
        m.switch_trigger_ts = epoch_ms();
    }
    tracing::info!(index, confidence, "weak link detected; draining before switch");

    if confidence >= 0.5 {
        env.probe.boost_short(PROBE_BOOST);
    }
    env.pool.set_limit(env.conc_weak);

    loop {
        let snap = env.pool.snapshot();
        if snap.small_queued == 0 && snap.running <= env.conc_weak {
            break;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }

    let prev_net = env.link.default_net_id();
    let pause_start = Instant::now();
    let _ = env.link.open_link_settings();

    let mut link_changed = false;
    while pause_start.elapsed() < LINK_WAIT_MAX {
        tokio::time::sleep(LINK_POLL).await;
        if env.link.default_net_id() != prev_net {
            link_changed = true;
            break;
        }
    }

    {
        let mut m = env.shared.migration.lock().unwrap();
        m.paused_ms += pause_start.elapsed().as_millis() as u64;
        m.state = MigrationState::Switched;
        m.prompts_left -= 1;
    }
    env.pool.set_limit(env.conc_after);

    if link_changed {
        tracing::info!(prev_net, "default link changed; resuming at full width");
    } else {
        tracing::warn!("link did not change within the wait cap; resuming anyway");
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
