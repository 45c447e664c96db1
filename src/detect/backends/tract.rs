#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{PlateDetector, VehicleDetector, MIN_PLATE_CROP_DIM};
use crate::detect::result::{PlateDetection, VehicleClass, VehicleDetection};
use crate::frame::{BoundingBox, CropImage, Frame};

/// COCO class ids for the classes of interest.
const COCO_CAR: usize = 2;
const COCO_BUS: usize = 5;
const COCO_TRUCK: usize = 7;

/// Tract-based ONNX vehicle detector.
///
/// Expects a detection model exported with NMS baked in, producing one
/// `[n, 6]` output of `x1, y1, x2, y2, confidence, class_id` rows in model
/// input coordinates. Loads a local model file only; no network I/O.
pub struct TractVehicleDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    min_box_size: u32,
}

impl TractVehicleDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model = load_model(model_path.as_ref(), input_width, input_height)?;
        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.4,
            min_box_size: 100,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

impl VehicleDetector for TractVehicleDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<VehicleDetection>> {
        let input = build_input(
            frame.pixels(),
            frame.width,
            frame.height,
            self.input_width,
            self.input_height,
        )?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let rows = detection_rows(&outputs)?;

        // Model coordinates scale back to frame coordinates.
        let sx = frame.width as f32 / self.input_width as f32;
        let sy = frame.height as f32 / self.input_height as f32;

        let mut vehicles = Vec::new();
        for row in rows {
            let [x1, y1, x2, y2, confidence, class_id] = row;
            if confidence < self.confidence_threshold {
                continue;
            }
            let class = match class_id as usize {
                COCO_CAR => VehicleClass::Car,
                COCO_BUS => VehicleClass::Bus,
                COCO_TRUCK => VehicleClass::Truck,
                _ => continue,
            };
            let bbox = BoundingBox::new(
                (x1 * sx) as i32,
                (y1 * sy) as i32,
                (x2 * sx) as i32,
                (y2 * sy) as i32,
            )
            .clamp_to(frame.width, frame.height);
            if bbox.width() < self.min_box_size || bbox.height() < self.min_box_size {
                continue;
            }
            let index = vehicles.len();
            vehicles.push(VehicleDetection::new(
                bbox,
                class,
                confidence,
                frame.index,
                index,
            ));
        }

        Ok(vehicles)
    }
}

/// Tract-based ONNX plate detector. Same export contract as the vehicle
/// model, single plate class, at most one detection consumed per crop.
pub struct TractPlateDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

impl TractPlateDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model = load_model(model_path.as_ref(), input_width, input_height)?;
        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.35,
        })
    }
}

impl PlateDetector for TractPlateDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, crop: &CropImage) -> Result<Option<PlateDetection>> {
        if crop.width < MIN_PLATE_CROP_DIM || crop.height < MIN_PLATE_CROP_DIM {
            return Ok(None);
        }

        let input = build_input(
            &crop.data,
            crop.width,
            crop.height,
            self.input_width,
            self.input_height,
        )?;
        // Model failure on a single crop degrades to "no detection".
        let outputs = match self.model.run(tvec!(input.into())) {
            Ok(outputs) => outputs,
            Err(err) => {
                log::warn!("plate inference failed, treating as no detection: {err}");
                return Ok(None);
            }
        };

        let best = detection_rows(&outputs)?
            .into_iter()
            .filter(|row| row[4] >= self.confidence_threshold)
            .max_by(|a, b| a[4].total_cmp(&b[4]));
        let Some([x1, y1, x2, y2, confidence, _]) = best else {
            return Ok(None);
        };

        let sx = crop.width as f32 / self.input_width as f32;
        let sy = crop.height as f32 / self.input_height as f32;
        let bbox = BoundingBox::new(
            (x1 * sx) as i32,
            (y1 * sy) as i32,
            (x2 * sx) as i32,
            (y2 * sy) as i32,
        )
        .clamp_to(crop.width, crop.height);
        if bbox.width() == 0 || bbox.height() == 0 {
            return Ok(None);
        }

        let frame = Frame::new(crop.data.clone(), crop.width, crop.height, 0)?;
        let Some(plate_crop) = frame.crop(bbox) else {
            return Ok(None);
        };

        Ok(Some(PlateDetection {
            bbox,
            confidence,
            crop: plate_crop,
        }))
    }
}

fn load_model(
    model_path: &Path,
    width: u32,
    height: u32,
) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// Resize (nearest-neighbor) and normalize RGB24 pixels into an NCHW tensor.
fn build_input(
    pixels: &[u8],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<Tensor> {
    let expected = (src_width as usize)
        .checked_mul(src_height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected,
            pixels.len()
        ));
    }

    let input = tract_ndarray::Array4::from_shape_fn(
        (1, 3, dst_height as usize, dst_width as usize),
        |(_, channel, y, x)| {
            let src_x = (x as u32 * src_width / dst_width).min(src_width - 1) as usize;
            let src_y = (y as u32 * src_height / dst_height).min(src_height - 1) as usize;
            let idx = (src_y * src_width as usize + src_x) * 3 + channel;
            pixels[idx] as f32 / 255.0
        },
    );

    Ok(input.into_tensor())
}

/// Flatten the model output into `[x1, y1, x2, y2, confidence, class_id]` rows.
fn detection_rows(outputs: &TVec<TValue>) -> Result<Vec<[f32; 6]>> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    let flat: Vec<f32> = view.iter().copied().collect();
    if flat.len() % 6 != 0 {
        return Err(anyhow!(
            "model output length {} is not a multiple of 6",
            flat.len()
        ));
    }
    Ok(flat
        .chunks_exact(6)
        .map(|c| [c[0], c[1], c[2], c[3], c[4], c[5]])
        .collect())
}
