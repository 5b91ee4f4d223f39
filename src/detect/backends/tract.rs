#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::detect::yolo::{self, ScoreLayout};

/// Tract-based backend for YOLO ONNX models.
///
/// Loads a local model file once and runs inference on RGB frames resized to a square
/// input. It does no network I/O and writes nothing to disk.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    score_floor: f32,
    layout: ScoreLayout,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            score_floor: 0.0,
            layout: ScoreLayout::default(),
        })
    }

    /// Drop rows whose confidence is not above `floor` before they leave the backend.
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor;
        self
    }

    /// How the model's class scores relate to its objectness column.
    pub fn with_score_layout(mut self, layout: ScoreLayout) -> Self {
        self.layout = layout;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let side = self.input_size as usize;
        let data = yolo::to_nchw_input(pixels, width, height, self.input_size)?;
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, side, side), data)
            .context("build input tensor")?;
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let mut detections = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let row_len = *view
                .shape()
                .last()
                .ok_or_else(|| anyhow!("model output has no dimensions"))?;
            let rows: Vec<f32> = view.iter().copied().collect();
            detections.extend(yolo::decode_rows(
                &rows,
                row_len,
                self.layout,
                width,
                height,
                self.score_floor,
            )?);
        }
        Ok(detections)
    }
}
