//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride-8, stride-16 and stride-32 feature grids
//! predicts one candidate face. The network emits twelve tensors, grouped by kind and then
//! by stride:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! Scores are already sigmoid-activated; the face score of a cell is `sqrt(cls * obj)`.
//! Box centers and landmarks are offsets in grid units, box sizes are log-scale:
//!
//! ```text
//! cx = (col + dx) * stride        w = exp(dw) * stride
//! cy = (row + dy) * stride        h = exp(dh) * stride
//! ```

use anyhow::Result;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5 (normalized [0,1])
}

/// Borrow the tensor at `index`, checking it is `[1, rows, cols]`.
fn tensor<'a>(
    outputs: &[(&[i64], &'a [f32])],
    index: usize,
    rows: usize,
    cols: usize,
) -> Result<&'a [f32]> {
    let Some(&(shape, data)) = outputs.get(index) else {
        anyhow::bail!("missing YuNet output {}", index);
    };
    let expected = [1, rows as i64, cols as i64];
    if shape != &expected[..] {
        anyhow::bail!(
            "unexpected shape for YuNet output {}: {:?}, expected {:?}",
            index,
            shape,
            expected
        );
    }
    if data.len() != rows * cols {
        anyhow::bail!(
            "YuNet output {} holds {} values, expected {}",
            index,
            data.len(),
            rows * cols
        );
    }
    Ok(data)
}

/// Decode raw YuNet outputs into detections whose score is at least `score_threshold`.
///
/// Coordinates are normalized to the square `input_size` canvas the network saw.
pub fn decode_detections(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<RawDetection>> {
    let size = input_size as f32;
    let mut detections = Vec::new();

    for (level, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;

        let cls = tensor(outputs, level, cells, 1)?;
        let obj = tensor(outputs, level + 3, cells, 1)?;
        let bbox = tensor(outputs, level + 6, cells, 4)?;
        let kps = tensor(outputs, level + 9, cells, 10)?;

        let step = stride as f32;
        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }

            let row = (idx / cols) as f32;
            let col = (idx % cols) as f32;
            let b = &bbox[idx * 4..idx * 4 + 4];

            let cx = (col + b[0]) * step;
            let cy = (row + b[1]) * step;
            let w = b[2].exp() * step;
            let h = b[3].exp() * step;

            let mut landmarks = [0.0f32; 10];
            for (k, point) in kps[idx * 10..idx * 10 + 10].chunks_exact(2).enumerate() {
                landmarks[k * 2] = (col + point[0]) * step / size;
                landmarks[k * 2 + 1] = (row + point[1]) * step / size;
            }

            detections.push(RawDetection {
                bbox: [
                    (cx - w / 2.0) / size,
                    (cy - h / 2.0) / size,
                    w / size,
                    h / size,
                ],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Outputs {
        shapes: Vec<[i64; 3]>,
        data: Vec<Vec<f32>>,
    }

    impl Outputs {
        fn empty(input_size: usize) -> Self {
            let mut shapes = Vec::new();
            let mut data = Vec::new();
            for cols in [1, 1, 4, 10] {
                for stride in STRIDES {
                    let cells = (input_size / stride).pow(2);
                    shapes.push([1, cells as i64, cols as i64]);
                    data.push(vec![0.0; cells * cols]);
                }
            }
            Self { shapes, data }
        }

        fn refs(&self) -> Vec<(&[i64], &[f32])> {
            self.shapes
                .iter()
                .zip(self.data.iter())
                .map(|(s, d)| (s.as_slice(), d.as_slice()))
                .collect()
        }
    }

    #[test]
    fn test_decode_single_cell() {
        let input_size = 640;
        let mut out = Outputs::empty(input_size);

        // stride 32, grid 20x20, cell (row 10, col 10)
        let idx = 10 * 20 + 10;
        out.data[2][idx] = 0.9; // cls_32
        out.data[5][idx] = 0.9; // obj_32
        out.data[8][idx * 4] = 0.5;
        out.data[8][idx * 4 + 1] = 0.3;
        out.data[8][idx * 4 + 2] = 4.0f32.ln();
        out.data[8][idx * 4 + 3] = 4.0f32.ln();

        let detections = decode_detections(&out.refs(), input_size, 0.5).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // cx = 10.5 * 32 = 336, cy = 10.3 * 32 = 329.6, w = h = 4 * 32 = 128
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);

        // zero landmark offsets land on the cell corner: 10 * 32 / 640
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_low_objectness_suppresses_cell() {
        let input_size = 640;
        let mut out = Outputs::empty(input_size);
        out.data[0][0] = 0.99;
        out.data[3][0] = 0.01;

        let detections = decode_detections(&out.refs(), input_size, 0.5).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let input_size = 640;
        let mut out = Outputs::empty(input_size);
        out.shapes[7] = [1, 1600, 5];

        assert!(decode_detections(&out.refs(), input_size, 0.5).is_err());
    }

    #[test]
    fn test_rejects_missing_outputs() {
        let out = Outputs::empty(640);
        let refs = out.refs();
        assert!(decode_detections(&refs[..11], 640, 0.5).is_err());
    }
}
