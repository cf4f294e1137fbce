//! Sensor counters

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::timing::Nsecs;

#[derive(Default)]
struct Counters {
    frames_exposed: AtomicU64,
    readouts_published: AtomicU64,
    readout_stalls: AtomicU64,
    upstream_failures: AtomicU64,
    skipped_buffers: AtomicU64,
    average_frame_period: AtomicI64,
}

/// Written by the sensor worker, read from anywhere
#[derive(Default)]
pub struct SensorStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`SensorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorMetrics {
    pub frames_exposed: u64,
    pub readouts_published: u64,
    /// Iterations where the worker waited for the consumer to collect a readout
    pub readout_stalls: u64,
    pub upstream_failures: u64,
    pub skipped_buffers: u64,
    pub average_frame_period_ns: Nsecs,
}

impl SensorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exposure_started(&self) {
        self.counters.frames_exposed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sensor_frames_exposed").increment(1);
    }

    pub fn readout_published(&self, stalled: bool) {
        self.counters
            .readouts_published
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sensor_readouts_published").increment(1);
        if stalled {
            self.counters.readout_stalls.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sensor_readout_stalls").increment(1);
        }
    }

    pub fn buffers_dispatched(&self, skipped: usize, upstream_failures: usize) {
        if skipped > 0 {
            self.counters
                .skipped_buffers
                .fetch_add(skipped as u64, Ordering::Relaxed);
            metrics::counter!("sensor_skipped_buffers").increment(skipped as u64);
        }
        if upstream_failures > 0 {
            self.counters
                .upstream_failures
                .fetch_add(upstream_failures as u64, Ordering::Relaxed);
            metrics::counter!("sensor_upstream_failures").increment(upstream_failures as u64);
        }
    }

    pub fn frame_finished(&self, period: Nsecs, average: Option<Nsecs>) {
        metrics::histogram!("sensor_frame_period_ms").record(period as f64 / 1_000_000.0);
        if let Some(average) = average {
            self.counters
                .average_frame_period
                .store(average, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SensorMetrics {
        let c = &self.counters;
        SensorMetrics {
            frames_exposed: c.frames_exposed.load(Ordering::Relaxed),
            readouts_published: c.readouts_published.load(Ordering::Relaxed),
            readout_stalls: c.readout_stalls.load(Ordering::Relaxed),
            upstream_failures: c.upstream_failures.load(Ordering::Relaxed),
            skipped_buffers: c.skipped_buffers.load(Ordering::Relaxed),
            average_frame_period_ns: c.average_frame_period.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let stats = SensorStats::new();
        stats.exposure_started();
        stats.exposure_started();
        stats.readout_published(false);
        stats.readout_published(true);
        stats.buffers_dispatched(2, 1);
        stats.frame_finished(33_000_000, Some(33_400_000));

        assert_eq!(
            stats.snapshot(),
            SensorMetrics {
                frames_exposed: 2,
                readouts_published: 2,
                readout_stalls: 1,
                upstream_failures: 1,
                skipped_buffers: 2,
                average_frame_period_ns: 33_400_000,
            }
        );
    }
}
