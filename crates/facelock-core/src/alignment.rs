//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! InsightFace reference landmarks and least-squares estimation.

use image::{Rgb, RgbImage};
use thiserror::Error;

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Smallest-to-largest spread ratio below which landmarks count as collinear.
const MIN_SPREAD_RATIO: f64 = 1e-6;
const PIVOT_EPSILON: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("alignment needs 5 landmarks, got {0}")]
    TooFewLandmarks(usize),
    #[error("landmark coordinates must be finite")]
    NonFinite,
    #[error("landmarks are degenerate (collinear or coincident); similarity transform is singular")]
    Singular,
}

/// 2×3 similarity transform
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    /// Rotation angle in radians.
    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` when the scale is zero.
    pub fn inverse(&self) -> Option<SimilarityTransform> {
        let det = self.a * self.a + self.b * self.b;
        if det < PIVOT_EPSILON {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(SimilarityTransform {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }

    pub fn to_matrix(&self) -> [f32; 6] {
        [
            self.a as f32,
            -self.b as f32,
            self.tx as f32,
            self.b as f32,
            self.a as f32,
            self.ty as f32,
        ]
    }
}

/// Reject landmark sets that cannot determine a similarity transform reliably:
/// non-finite values, or points whose 2-D scatter is rank-deficient.
fn check_landmark_spread(points: &[(f64, f64)]) -> Result<(), AlignmentError> {
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(AlignmentError::NonFinite);
    }

    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for &(x, y) in points {
        let (dx, dy) = (x - mx, y - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    // det / trace² is the product of the scatter eigenvalues over their sum
    // squared; it vanishes exactly when the points lie on a line.
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    if trace <= 0.0 || det / (trace * trace) < MIN_SPREAD_RATIO {
        return Err(AlignmentError::Singular);
    }

    Ok(())
}

/// Estimate the least-squares similarity transform mapping `src` onto `dst`.
pub fn estimate_similarity_transform(
    src: &[(f32, f32)],
    dst: &[(f32, f32); 5],
) -> Result<SimilarityTransform, AlignmentError> {
    if src.len() < 5 {
        return Err(AlignmentError::TooFewLandmarks(src.len()));
    }

    let src: Vec<(f64, f64)> = src[..5].iter().map(|&(x, y)| (x as f64, y as f64)).collect();
    check_landmark_spread(&src)?;

    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (dx, dy) = (dx as f64, dy as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb).ok_or(AlignmentError::Singular)?;
    Ok(SimilarityTransform { a, b, tx, ty })
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
///
/// Returns `None` if the system is singular.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: [[f64; 4]; 4], atb: [f64; 4]) -> Option<[f64; 4]> {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f64; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < PIVOT_EPSILON {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f64; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Warp `image` through `transform` into an `out_size`×`out_size` image.
///
/// Uses bilinear interpolation. Samples outside the source are black.
pub fn warp_affine(
    image: &RgbImage,
    transform: &SimilarityTransform,
    out_size: u32,
) -> Result<RgbImage, AlignmentError> {
    let inv = transform.inverse().ok_or(AlignmentError::Singular)?;
    let (w, h) = (image.width() as i64, image.height() as i64);

    let sample = |x: i64, y: i64| -> [f64; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f64, p[1] as f64, p[2] as f64]
        } else {
            [0.0; 3]
        }
    };

    let output = RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = inv.apply(ox as f64, oy as f64);

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f64;
        let fy = sy - y0 as f64;

        let tl = sample(x0, y0);
        let tr = sample(x0 + 1, y0);
        let bl = sample(x0, y0 + 1);
        let br = sample(x0 + 1, y0 + 1);

        let mut px = [0u8; 3];
        for c in 0..3 {
            let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                + tr[c] * fx * (1.0 - fy)
                + bl[c] * (1.0 - fx) * fy
                + br[c] * fx * fy;
            px[c] = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    });

    Ok(output)
}

/// Align a detected face to a canonical 112×112 crop.
///
/// Takes an RGB image and five landmarks in image pixels (left eye, right eye,
/// nose, left mouth, right mouth), estimates the similarity transform to the
/// reference positions, and warps the face into a 112×112 output suitable for
/// ArcFace embedding extraction.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32)]) -> Result<RgbImage, AlignmentError> {
    let transform = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112)?;
    tracing::trace!(
        scale = transform.scale(),
        rotation = transform.rotation(),
        "estimated alignment transform"
    );
    warp_affine(image, &transform, ALIGNED_SIZE)
}
