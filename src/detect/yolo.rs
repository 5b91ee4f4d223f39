//! YOLO tensor helpers shared by model backends.
//!
//! Output rows are `[cx, cy, w, h, objectness, score_0 .. score_{C-1}]` with coordinates
//! normalized to the input image. The class is the argmax over class scores. How the
//! confidence is formed depends on the export, see `ScoreLayout`.

use anyhow::{anyhow, Result};
use std::str::FromStr;

use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::rgb_len;

const BOX_FIELDS: usize = 5;

/// Meaning of the class scores in an output row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoreLayout {
    /// Darknet exports (YOLOv3/v4): class scores are already conditioned on objectness,
    /// so the confidence is the best class score and `objectness` is ignored.
    #[default]
    Conditioned,
    /// YOLOv5-style exports: confidence is `objectness * best class score`.
    Objectness,
}

impl ScoreLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreLayout::Conditioned => "conditioned",
            ScoreLayout::Objectness => "objectness",
        }
    }
}

impl FromStr for ScoreLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conditioned" => Ok(ScoreLayout::Conditioned),
            "objectness" => Ok(ScoreLayout::Objectness),
            other => Err(anyhow!(
                "unknown score layout '{}'; expected conditioned or objectness",
                other
            )),
        }
    }
}

/// Decode YOLO output rows into pixel-space detections.
///
/// Rows whose confidence is not above `min_confidence` are skipped.
pub fn decode_rows(
    rows: &[f32],
    row_len: usize,
    layout: ScoreLayout,
    frame_width: u32,
    frame_height: u32,
    min_confidence: f32,
) -> Result<Vec<RawDetection>> {
    if row_len <= BOX_FIELDS {
        return Err(anyhow!(
            "yolo row length {} leaves no class scores",
            row_len
        ));
    }
    if rows.len() % row_len != 0 {
        return Err(anyhow!(
            "yolo output length {} is not a multiple of row length {}",
            rows.len(),
            row_len
        ));
    }

    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let mut detections = Vec::new();
    for row in rows.chunks_exact(row_len) {
        let scores = &row[BOX_FIELDS..];
        let Some((class_id, class_score)) = argmax(scores) else {
            continue;
        };
        let confidence = match layout {
            ScoreLayout::Conditioned => class_score,
            ScoreLayout::Objectness => row[4] * class_score,
        };
        if confidence.is_nan() || confidence <= min_confidence {
            continue;
        }
        let center_x = (row[0] * fw).trunc();
        let center_y = (row[1] * fh).trunc();
        let box_w = (row[2] * fw).trunc();
        let box_h = (row[3] * fh).trunc();
        detections.push(RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox::new(
                (center_x - box_w / 2.0).trunc(),
                (center_y - box_h / 2.0).trunc(),
                box_w,
                box_h,
            ),
        });
    }
    Ok(detections)
}

fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| score.is_finite())
        .fold(None, |best, (idx, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
}

/// Nearest-neighbor resize of an RGB frame into a square NCHW tensor scaled to `[0, 1]`.
pub fn to_nchw_input(pixels: &[u8], width: u32, height: u32, size: u32) -> Result<Vec<f32>> {
    let expected = rgb_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "expected {} RGB bytes, received {}",
            expected,
            pixels.len()
        ));
    }
    if width == 0 || height == 0 || size == 0 {
        return Err(anyhow!("frame and input sizes must be non-zero"));
    }

    let size = size as usize;
    let plane = size * size;
    let mut input = vec![0f32; plane * 3];
    for y in 0..size {
        let src_y = y * height as usize / size;
        for x in 0..size {
            let src_x = x * width as usize / size;
            let idx = (src_y * width as usize + src_x) * 3;
            for channel in 0..3 {
                input[channel * plane + y * size + x] = pixels[idx + channel] as f32 / 255.0;
            }
        }
    }
    Ok(input)
}
