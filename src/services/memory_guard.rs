//! Periodic memory check during long imports
//!
//! Every `interval` processed rows the importer asks the guard to measure
//! resident memory. Over the threshold, the importer releases its batch
//! buffer capacity. The guard never changes what gets imported.

use tracing::{debug, info};

/// Source of the current process memory reading
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in megabytes, `None` when unavailable
    fn resident_mb(&self) -> Option<f64>;
}

/// Reads `VmRSS` from `/proc/self/status`
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn resident_mb(&self) -> Option<f64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_kb(&status).map(|kb| kb / 1024.0)
    }
}

/// Probe returning a fixed reading
#[cfg(test)]
pub struct FixedMemoryProbe(pub Option<f64>);

#[cfg(test)]
impl MemoryProbe for FixedMemoryProbe {
    fn resident_mb(&self) -> Option<f64> {
        self.0
    }
}

fn parse_vm_rss_kb(status: &str) -> Option<f64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<f64>().ok())
}

/// What a guard invocation decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reclaim {
    /// Fewer than `interval` rows since the last check
    NotDue,
    /// Measured (or tried to) and stayed under the threshold
    Checked,
    /// Over the threshold; caller should release buffers
    Reclaim { resident_mb: f64 },
}

/// Returns the new checkpoint and the decision for this call.
pub fn maybe_reclaim(
    processed: u64,
    last_checkpoint: u64,
    interval: u64,
    threshold_mb: u64,
    probe: &dyn MemoryProbe,
) -> (u64, Reclaim) {
    if processed < last_checkpoint.saturating_add(interval.max(1)) {
        return (last_checkpoint, Reclaim::NotDue);
    }

    let Some(resident_mb) = probe.resident_mb() else {
        debug!("Memory check at row {}: resident size unavailable", processed);
        return (processed, Reclaim::Checked);
    };

    if resident_mb > threshold_mb as f64 {
        info!(
            "Memory usage {:.1} MB exceeds {} MB at row {}, releasing import buffers",
            resident_mb, threshold_mb, processed
        );
        return (processed, Reclaim::Reclaim { resident_mb });
    }

    info!("Memory usage {:.1} MB at row {}", resident_mb, processed);
    (processed, Reclaim::Checked)
}
