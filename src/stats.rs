//! Live diagnostics: counters and rolling latency windows.
//!
//! Nothing here is persisted; the window keeps only the last few samples for
//! console output while the pipeline runs.

use std::collections::{HashMap, VecDeque};

use crate::detect::VehicleClass;

/// Fixed-size rolling window of per-stage processing latency in milliseconds.
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, millis: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(millis);
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(10)
    }
}

/// End-of-run statistics snapshot.
#[derive(Clone, Debug, Default)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub vehicles_detected: u64,
    pub plates_found: u64,
    pub class_counts: HashMap<VehicleClass, u64>,
}

impl PipelineStats {
    pub fn log_summary(&self) {
        log::info!("frames processed: {}", self.frames_processed);
        log::info!("vehicles detected: {}", self.vehicles_detected);
        log::info!("plates found: {}", self.plates_found);
        for class in VehicleClass::ALL {
            let count = self.class_counts.get(&class).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            let share = count as f64 / self.vehicles_detected.max(1) as f64 * 100.0;
            log::info!("  {:>5}: {} ({:.1}%)", class.label(), count, share);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_drops_oldest_sample() {
        let mut window = LatencyWindow::new(3);
        for ms in [10.0, 20.0, 30.0, 40.0] {
            window.record(ms);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Some(30.0));
    }

    #[test]
    fn empty_window_has_no_average() {
        assert!(LatencyWindow::new(10).average().is_none());
    }
}
