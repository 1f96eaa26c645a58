use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// Side of the square canvas YuNet runs on.
const DETECTOR_INPUT: u32 = 640;

/// Side of the aligned crop SFace consumes.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112x112 crop (eyes, nose tip, mouth corners).
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Detection result from YuNet, in source image pixels
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// L2-normalized face embedding (SFace output)
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    /// Wrap a raw model output, scaling it to unit length.
    ///
    /// A zero vector is kept as-is.
    pub fn normalized(raw: Vec<f32>) -> Self {
        let mut vector = Array1::from(raw);
        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector.mapv_inplace(|x| x / norm);
        }
        Self { vector }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    // Letterbox onto a square canvas so the aspect ratio survives the resize
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        anyhow::bail!("image has no pixels");
    }
    let scale = DETECTOR_INPUT as f32 / orig_width.max(orig_height) as f32;
    let new_width = ((orig_width as f32 * scale) as u32).max(1);
    let new_height = ((orig_height as f32 * scale) as u32).max(1);
    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

    let mut canvas = RgbImage::new(DETECTOR_INPUT, DETECTOR_INPUT);
    let offset_x = (DETECTOR_INPUT - new_width) / 2;
    let offset_y = (DETECTOR_INPUT - new_height) / 2;
    image::imageops::overlay(
        &mut canvas,
        &resized.to_rgb8(),
        offset_x as i64,
        offset_y as i64,
    );

    let input_tensor = Value::from_array(channel_planes(&canvas, BGR))?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let raw = yunet::decode_detections(&output_refs, DETECTOR_INPUT as usize, score_threshold)?;

    // Normalized canvas coordinates -> canvas pixels -> source pixels
    let unmap_x = |v: f32| (v * DETECTOR_INPUT as f32 - offset_x as f32) / scale;
    let unmap_y = |v: f32| (v * DETECTOR_INPUT as f32 - offset_y as f32) / scale;
    let unmap_len = |v: f32| v * DETECTOR_INPUT as f32 / scale;

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                landmarks[i * 2] = unmap_x(d.landmarks[i * 2]);
                landmarks[i * 2 + 1] = unmap_y(d.landmarks[i * 2 + 1]);
            }
            Detection {
                bbox: [
                    unmap_x(d.bbox[0]),
                    unmap_y(d.bbox[1]),
                    unmap_len(d.bbox[2]),
                    unmap_len(d.bbox[3]),
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        return Ok(nms(&detections, nms_threshold));
    }
    Ok(detections)
}

/// Channel order expected by YuNet.
const BGR: [usize; 3] = [2, 1, 0];
/// Channel order expected by SFace (OpenCV feeds it with `swapRB`).
const RGB: [usize; 3] = [0, 1, 2];

/// Split an RGB image into a `[1, 3, H, W]` tensor in `[0, 255]`, plane `i` holding source
/// channel `order[i]`.
fn channel_planes(img: &RgbImage, order: [usize; 3]) -> Array4<f32> {
    let (w, h) = img.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for (plane, &channel) in order.iter().enumerate() {
            tensor[[0, plane, y, x]] = pixel[channel] as f32;
        }
    }
    tensor
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Least-squares similarity transform (rotation, uniform scale, translation) taking `src`
/// onto `dst`. Returns `(a, b, tx, ty)` for `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`.
fn similarity_transform(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Option<(f32, f32, f32, f32)> {
    let n = src.len().min(dst.len());
    if n < 2 {
        return None;
    }
    let mean = |pts: &[(f32, f32)]| {
        let (sx, sy) = pts[..n]
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n as f32, sy / n as f32)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    let (mut num_a, mut num_b, mut den) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()).take(n) {
        let (sx, sy, dx, dy) = (sx - smx, sy - smy, dx - dmx, dy - dmy);
        num_a += sx * dx + sy * dy;
        num_b += sx * dy - sy * dx;
        den += sx * sx + sy * sy;
    }
    if den <= f32::EPSILON {
        return None;
    }

    let a = num_a / den;
    let b = num_b / den;
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);
    Some((a, b, tx, ty))
}

/// Bilinear sample, `None` outside the image.
fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Warp the detected face onto the ArcFace reference landmarks at `size`x`size`
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let src: Vec<(f32, f32)> = detection
        .landmarks
        .chunks_exact(2)
        .map(|p| (p[0], p[1]))
        .collect();
    let factor = size as f32 / ALIGNED_SIZE as f32;
    let dst: Vec<(f32, f32)> = REFERENCE_LANDMARKS
        .iter()
        .map(|&(x, y)| (x * factor, y * factor))
        .collect();

    let Some((a, b, tx, ty)) = similarity_transform(&src, &dst) else {
        anyhow::bail!("degenerate landmarks, cannot align face");
    };
    let det = a * a + b * b;

    let rgb = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        // Invert the similarity to find where this output pixel comes from
        let u = out_x as f32 - tx;
        let v = out_y as f32 - ty;
        let in_x = (a * u + b * v) / det;
        let in_y = (-b * u + a * v) / det;
        if let Some(sampled) = sample_bilinear(&rgb, in_x, in_y) {
            *pixel = sampled;
        }
        // else: leave black
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode face image to embedding using SFace
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    // SFace expects [1, 3, 112, 112] RGB with values in [0, 255]
    let face_rgb = face_img
        .resize_exact(
            ALIGNED_SIZE,
            ALIGNED_SIZE,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();
    let input_tensor = Value::from_array(channel_planes(&face_rgb, RGB))?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if embedding_size == 0 || embedding_size > data.len() {
        anyhow::bail!("recognizer produced malformed output of shape {:?}", shape);
    }

    Ok(Embedding::normalized(data[..embedding_size].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        // No overlap
        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            detection([10.0, 10.0, 20.0, 20.0], 0.9),
            detection([12.0, 12.0, 20.0, 20.0], 0.8),
            detection([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_embedding_normalized() {
        let e = Embedding::normalized(vec![3.0, 4.0]);
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
        assert!((e.vector[1] - 0.8).abs() < 1e-6);

        let zero = Embedding::normalized(vec![0.0, 0.0]);
        assert_eq!(zero.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_similarity_transform_scale_and_shift() {
        let src = [(10.0, 20.0), (30.0, 20.0)];
        let dst = [(38.0, 52.0), (74.0, 52.0)];
        let (a, b, tx, ty) = similarity_transform(&src, &dst).unwrap();

        assert!((a - 1.8).abs() < 1e-5);
        assert!(b.abs() < 1e-5);
        assert!((a * 10.0 - b * 20.0 + tx - 38.0).abs() < 1e-4);
        assert!((b * 10.0 + a * 20.0 + ty - 52.0).abs() < 1e-4);
    }

    #[test]
    fn test_similarity_transform_degenerate() {
        let src = [(5.0, 5.0), (5.0, 5.0)];
        let dst = [(38.0, 52.0), (74.0, 52.0)];
        assert!(similarity_transform(&src, &dst).is_none());
    }

    #[test]
    fn test_align_identity_keeps_pixels() {
        let mut img = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([x as u8, y as u8, 7]);
        }
        let mut landmarks = [0.0f32; 10];
        for (i, &(x, y)) in REFERENCE_LANDMARKS.iter().enumerate() {
            landmarks[i * 2] = x;
            landmarks[i * 2 + 1] = y;
        }
        let det = Detection {
            bbox: [0.0, 0.0, 112.0, 112.0],
            score: 1.0,
            landmarks,
        };

        let aligned = align_face(&DynamicImage::ImageRgb8(img.clone()), &det, ALIGNED_SIZE)
            .unwrap()
            .to_rgb8();
        assert_eq!(aligned.get_pixel(40, 60), img.get_pixel(40, 60));
        assert_eq!(aligned.get_pixel(90, 20), img.get_pixel(90, 20));
    }

    #[test]
    fn test_channel_planes_order() {
        let img = RgbImage::from_pixel(2, 1, Rgb([10, 20, 30]));

        let bgr = channel_planes(&img, BGR);
        assert_eq!(bgr.shape(), &[1, 3, 1, 2]);
        assert_eq!(
            [bgr[[0, 0, 0, 1]], bgr[[0, 1, 0, 1]], bgr[[0, 2, 0, 1]]],
            [30.0, 20.0, 10.0]
        );

        let rgb = channel_planes(&img, RGB);
        assert_eq!(
            [rgb[[0, 0, 0, 0]], rgb[[0, 1, 0, 0]], rgb[[0, 2, 0, 0]]],
            [10.0, 20.0, 30.0]
        );
    }
}
