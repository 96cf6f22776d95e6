//! Memory pressure detection
//!
//! Pressure levels derived from cache utilization, plus a probe for the
//! host process's share of system memory. The probe sits behind a trait
//! so the coordinator can be driven with a fixed source in tests.

/// Memory pressure level derived from a utilization ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Usage below 50% of the budget
    Low,
    /// Usage between 50% and 75%
    Moderate,
    /// Usage between 75% and 90%
    High,
    /// Usage at or above 90%
    Critical,
}

impl MemoryPressure {
    /// Classify a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Whether this level calls for eviction
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// Source of system-wide memory pressure readings
pub trait MemorySource: Send + Sync {
    /// Fraction of total system memory held by this process (0.0 to 1.0),
    /// or `None` when the platform offers no cheap way to measure it
    fn system_memory_pressure(&self) -> Option<f64>;
}

/// Probes `/proc` for the process's resident share of system memory
///
/// Returns `None` on platforms without procfs.
#[derive(Debug, Default)]
pub struct ProcMemorySource;

impl MemorySource for ProcMemorySource {
    #[cfg(target_os = "linux")]
    fn system_memory_pressure(&self) -> Option<f64> {
        let rss_kb = read_proc_field("/proc/self/status", "VmRSS:")?;
        let total_kb = read_proc_field("/proc/meminfo", "MemTotal:")?;
        if total_kb == 0 {
            return None;
        }
        Some(rss_kb as f64 / total_kb as f64)
    }

    #[cfg(not(target_os = "linux"))]
    fn system_memory_pressure(&self) -> Option<f64> {
        None
    }
}

/// Always reports a fixed pressure value
///
/// Useful for exercising pressure handling deterministically.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemorySource(pub f64);

impl MemorySource for FixedMemorySource {
    fn system_memory_pressure(&self) -> Option<f64> {
        Some(self.0)
    }
}

#[cfg(target_os = "linux")]
fn read_proc_field(path: &str, field: &str) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix(field) {
            // Lines look like "VmRSS:   123456 kB"
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}
