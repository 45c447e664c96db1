//! Shared pipeline state: the plate registry and the current detection set.
//!
//! Both structures sit behind their own `Mutex` inside [`crate::pipeline`]'s
//! shared state. Locks are held only for the snapshot or update, never across
//! a detector call.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::detect::{PlateDetection, VehicleClass, VehicleDetection};
use crate::stats::{LatencyWindow, PipelineStats};

/// One live plate sighting, keyed by the vehicle_id it was detected for.
pub struct PlateRegistryEntry {
    pub plate: PlateDetection,
    pub vehicle: VehicleDetection,
    /// Rendered frames since the entry was last written.
    pub age_in_frames: u32,
    pub storage_path: PathBuf,
}

/// Rendering view of a live entry.
#[derive(Clone, Debug)]
pub struct LivePlate {
    pub confidence: f32,
}

/// Time-limited registry of plate sightings.
///
/// Leaky, not overflowing: unbounded in keys, bounded in time. An entry is
/// visible while `age_in_frames < ttl`; age advances exactly once per
/// rendered frame via [`PlateRegistry::advance`]; a new detection for the
/// same key overwrites the entry and resets its age to 0.
pub struct PlateRegistry {
    entries: HashMap<String, PlateRegistryEntry>,
    ttl_frames: u32,
    pub plates_found: u64,
    pub latency: LatencyWindow,
}

impl PlateRegistry {
    pub fn new(ttl_frames: u32) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_frames,
            plates_found: 0,
            latency: LatencyWindow::default(),
        }
    }

    /// Write or overwrite the entry for `vehicle_id`, resetting its age.
    pub fn record(
        &mut self,
        plate: PlateDetection,
        vehicle: VehicleDetection,
        storage_path: PathBuf,
    ) {
        let vehicle_id = vehicle.vehicle_id.clone();
        self.entries.insert(
            vehicle_id,
            PlateRegistryEntry {
                plate,
                vehicle,
                age_in_frames: 0,
                storage_path,
            },
        );
        self.plates_found += 1;
    }

    /// One rendered frame's worth of registry maintenance: snapshot the
    /// entries visible for this frame, then age every entry and evict the
    /// expired ones.
    ///
    /// An entry written between two rendered frames is therefore visible on
    /// exactly the `ttl` frames where its age is `0..ttl`.
    pub fn advance(&mut self) -> HashMap<String, LivePlate> {
        let live = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.age_in_frames < self.ttl_frames)
            .map(|(id, entry)| {
                (
                    id.clone(),
                    LivePlate {
                        confidence: entry.plate.confidence,
                    },
                )
            })
            .collect();

        for entry in self.entries.values_mut() {
            entry.age_in_frames += 1;
        }
        let ttl = self.ttl_frames;
        self.entries.retain(|_, entry| entry.age_in_frames < ttl);

        live
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&PlateRegistryEntry> {
        self.entries.get(vehicle_id)
    }
}

/// Latest published detection set plus the vehicle-stage counters.
///
/// Published wholesale by the vehicle stage (replace, not merge) and read by
/// the coordinator for rendering.
pub struct DetectionState {
    pub current: Vec<VehicleDetection>,
    pub frames_processed: u64,
    pub vehicles_detected: u64,
    pub class_counts: HashMap<VehicleClass, u64>,
    /// Frame indices whose detection cycle blew the latency budget; the
    /// coordinator skips these for display only.
    pub slow_frames: HashSet<u64>,
    pub latency: LatencyWindow,
}

impl DetectionState {
    pub fn new() -> Self {
        Self {
            current: Vec::new(),
            frames_processed: 0,
            vehicles_detected: 0,
            class_counts: HashMap::new(),
            slow_frames: HashSet::new(),
            latency: LatencyWindow::default(),
        }
    }

    /// Consume the slow mark for a rendered frame. Frames render in index
    /// order, so marks at or behind the render position can no longer affect
    /// display and are dropped, keeping the set bounded on endless streams.
    pub fn consume_slow_mark(&mut self, frame_index: u64) -> bool {
        let slow = self.slow_frames.remove(&frame_index);
        self.slow_frames.retain(|&index| index > frame_index);
        slow
    }

    /// Replace the current detection set and update the counters.
    pub fn publish(&mut self, detections: Vec<VehicleDetection>) {
        self.frames_processed += 1;
        self.vehicles_detected += detections.len() as u64;
        for detection in &detections {
            *self.class_counts.entry(detection.class).or_insert(0) += 1;
        }
        self.current = detections;
    }

    pub fn stats(&self, plates_found: u64) -> PipelineStats {
        PipelineStats {
            frames_processed: self.frames_processed,
            vehicles_detected: self.vehicles_detected,
            plates_found,
            class_counts: self.class_counts.clone(),
        }
    }
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BoundingBox, CropImage};

    fn plate(confidence: f32) -> PlateDetection {
        PlateDetection {
            bbox: BoundingBox::new(0, 0, 40, 12),
            confidence,
            crop: CropImage {
                data: vec![0; 40 * 12 * 3],
                width: 40,
                height: 12,
            },
        }
    }

    fn vehicle(frame_index: u64) -> VehicleDetection {
        VehicleDetection::new(
            BoundingBox::new(0, 0, 150, 150),
            VehicleClass::Car,
            0.9,
            frame_index,
            0,
        )
    }

    #[test]
    fn entry_is_visible_for_exactly_ttl_frames() {
        let mut registry = PlateRegistry::new(4);
        let vehicle = vehicle(0);
        let id = vehicle.vehicle_id.clone();
        registry.record(plate(0.8), vehicle, PathBuf::from("plates/x.jpg"));

        for age in 0..4 {
            let live = registry.advance();
            assert!(live.contains_key(&id), "expected visible at age {}", age);
        }
        assert!(!registry.advance().contains_key(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn overwrite_resets_age() {
        let mut registry = PlateRegistry::new(4);
        let vehicle_a = vehicle(0);
        let id = vehicle_a.vehicle_id.clone();
        registry.record(plate(0.5), vehicle_a, PathBuf::from("plates/a.jpg"));

        registry.advance();
        registry.advance();

        let vehicle_b = vehicle(0);
        registry.record(plate(0.9), vehicle_b, PathBuf::from("plates/b.jpg"));
        assert_eq!(registry.get(&id).unwrap().age_in_frames, 0);

        // Fresh TTL after the overwrite.
        for _ in 0..4 {
            assert!(registry.advance().contains_key(&id));
        }
        assert!(!registry.advance().contains_key(&id));
        assert_eq!(registry.plates_found, 2);
    }

    #[test]
    fn live_snapshot_carries_plate_confidence() {
        let mut registry = PlateRegistry::new(4);
        let vehicle = vehicle(7);
        let id = vehicle.vehicle_id.clone();
        registry.record(plate(0.62), vehicle, PathBuf::from("plates/y.jpg"));
        let live = registry.advance();
        assert!((live[&id].confidence - 0.62).abs() < f32::EPSILON);
    }

    #[test]
    fn slow_marks_are_consumed_and_pruned_at_the_render_position() {
        let mut state = DetectionState::new();
        state.slow_frames.insert(3);
        state.slow_frames.insert(5);
        state.slow_frames.insert(9);

        assert!(state.consume_slow_mark(5));
        // Marks behind the render position are gone, later ones survive.
        assert!(!state.slow_frames.contains(&3));
        assert!(state.slow_frames.contains(&9));
        assert_eq!(state.slow_frames.len(), 1);
        assert!(!state.consume_slow_mark(5));
        assert!(!state.consume_slow_mark(6));
    }

    #[test]
    fn publish_replaces_and_counts() {
        let mut state = DetectionState::new();
        state.publish(vec![vehicle(0), vehicle(0)]);
        state.publish(vec![vehicle(1)]);

        assert_eq!(state.current.len(), 1);
        assert_eq!(state.frames_processed, 2);
        assert_eq!(state.vehicles_detected, 3);
        assert_eq!(state.class_counts[&VehicleClass::Car], 3);
    }
}
