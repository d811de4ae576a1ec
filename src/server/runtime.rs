//! Worker thread sizing for the tokio runtime.
//!
//! Containers usually see the host CPU count, which over-provisions threads
//! when the pod is limited to a few cores. Detection order:
//! 1. `RULEGATE_WORKER_THREADS` (`4` or `4000m`)
//! 2. cgroup v2 `cpu.max`
//! 3. cgroup v1 `cpu.cfs_quota_us` / `cpu.cfs_period_us`
//! 4. `available_parallelism()`

use std::fmt;

pub const WORKER_THREADS_ENV: &str = "RULEGATE_WORKER_THREADS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingSource {
    Env,
    CgroupV2,
    CgroupV1,
    Host,
}

impl fmt::Display for SizingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizingSource::Env => WORKER_THREADS_ENV,
            SizingSource::CgroupV2 => "cgroup v2",
            SizingSource::CgroupV1 => "cgroup v1",
            SizingSource::Host => "host",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSizing {
    pub threads: usize,
    pub source: SizingSource,
}

/// Read before the runtime (and tracing) exist; the caller logs the result.
pub fn worker_threads() -> WorkerSizing {
    let env = std::env::var(WORKER_THREADS_ENV).ok();
    let v2 = std::fs::read_to_string("/sys/fs/cgroup/cpu.max").ok();
    let v1 = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()
        .zip(std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us").ok());
    let host = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    resolve(env.as_deref(), v2.as_deref(), v1, host)
}

fn resolve(
    env: Option<&str>,
    cgroup_v2: Option<&str>,
    cgroup_v1: Option<(String, String)>,
    host: usize,
) -> WorkerSizing {
    let sized = |threads: usize, source| WorkerSizing {
        threads: threads.max(1),
        source,
    };

    if let Some(n) = env.and_then(parse_cpu_value) {
        return sized(n, SizingSource::Env);
    }
    if let Some(n) = cgroup_v2.and_then(parse_cgroup_v2_cpu) {
        return sized(n, SizingSource::CgroupV2);
    }
    if let Some(n) = cgroup_v1.and_then(|(q, p)| parse_cgroup_v1_cpu(&q, &p)) {
        return sized(n, SizingSource::CgroupV1);
    }
    sized(host, SizingSource::Host)
}

/// `4` (cores) or `4000m` (millicores). Partial cores round up.
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(milli) => milli.parse::<usize>().ok().map(|m| m.div_ceil(1000)),
        None => value.parse::<usize>().ok(),
    }
}

/// `cpu.max` is `"<quota> <period>"` or `"max <period>"` (unlimited).
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    quota_to_cores(quota.parse().ok()?, period.parse().ok()?)
}

fn parse_cgroup_v1_cpu(quota: &str, period: &str) -> Option<usize> {
    quota_to_cores(quota.trim().parse().ok()?, period.trim().parse().ok()?)
}

fn quota_to_cores(quota: i64, period: i64) -> Option<usize> {
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some(((quota + period - 1) / period) as usize)
}
