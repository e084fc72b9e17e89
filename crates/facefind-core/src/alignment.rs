//! Face crops for the recognizer.
//!
//! Aligned crops use a 4-DOF similarity transform onto the five InsightFace
//! reference landmarks. Unaligned crops cut the bounding box, and skipped
//! detection resizes the whole image.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Estimate a similarity transform (scale, rotation, translation) mapping
/// `src` landmarks onto `dst` in the least-squares sense.
///
/// Returns `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the unknowns [a, b, tx, ty]. Each point pair gives
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting on a 4×4 system.
///
/// A singular system yields the identity scale `[1, 0, 0, 0]`.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f32; 4]; 4], b: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    x
}

/// Bilinear sample of one RGB pixel; out-of-bounds neighbours are black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let fetch = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let taps = [
        (fetch(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (fetch(x0 + 1, y0), fx * (1.0 - fy)),
        (fetch(x0, y0 + 1), (1.0 - fx) * fy),
        (fetch(x0 + 1, y0 + 1), fx * fy),
    ];

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v: f32 = taps.iter().map(|(px, w)| px[c] * w).sum();
        *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Warp `image` through the forward transform `matrix` into an `out_size` square.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, b, tx, ty) = (matrix[0], matrix[3], matrix[2], matrix[5]);

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        sample_bilinear(image, ia * dx + ib * dy, -ib * dx + ia * dy)
    })
}

/// Align a detected face onto the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}

/// Cut the bounding box (clamped to the image) and resize it to 112×112.
///
/// Returns `None` when the clamped box is empty.
pub fn crop_face(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(image.width());
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(image.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let crop = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(image::imageops::resize(&crop, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle))
}

/// Use the whole image as the face region.
pub fn whole_image(image: &RgbImage) -> RgbImage {
    image::imageops::resize(image, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}
