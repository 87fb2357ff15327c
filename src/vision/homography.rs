//! Robust projective transform estimation and perspective warping
//!
//! Normalized DLT (direct linear transform) for the homography fit, wrapped
//! in a RANSAC loop with a reprojection-error inlier test. The warper applies
//! the inverse transform with bilinear sampling to rectify a frame into the
//! template's canonical space.

use image::{GrayImage, Luma};
use nalgebra::{Matrix3, SMatrix, Vector3};

use super::{Correspondence, HomographyEstimator, ImageWarper};

type Mat9 = SMatrix<f64, 9, 9>;

/// A 3x3 projective transform mapping frame coordinates to template
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Apply the transform to a point. A point on the plane at infinity maps
    /// to infinite coordinates, which any reprojection test rejects.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.m * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return (f64::INFINITY, f64::INFINITY);
        }
        (p.x / p.z, p.y / p.z)
    }

    pub fn inverse(&self) -> Option<Homography> {
        self.m.try_inverse().map(|m| Homography { m })
    }
}

/// Homography plus its per-correspondence inlier mask.
#[derive(Debug, Clone)]
pub struct HomographyFit {
    pub homography: Homography,
    pub inliers: Vec<bool>,
}

impl HomographyFit {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&b| b).count()
    }
}

/// RANSAC homography estimator over frame-to-template correspondences.
pub struct RansacHomography {
    /// Number of minimal-sample hypotheses to evaluate.
    pub max_iters: usize,
}

impl Default for RansacHomography {
    fn default() -> Self {
        Self { max_iters: 500 }
    }
}

impl HomographyEstimator for RansacHomography {
    fn estimate(
        &self,
        correspondences: &[Correspondence],
        reproj_threshold: f64,
    ) -> Option<HomographyFit> {
        let n = correspondences.len();
        if n < 4 {
            return None;
        }

        let mut rng = XorShift64::new(0x2545_F491_4F6C_DD1D);
        let mut best_mask: Option<Vec<bool>> = None;
        let mut best_count = 0usize;

        for _ in 0..self.max_iters {
            let sample = sample_four(&mut rng, n);
            let picked: Vec<Correspondence> =
                sample.iter().map(|&i| correspondences[i]).collect();
            if sample_degenerate(&picked) {
                continue;
            }
            let Some(candidate) = dlt(&picked) else {
                continue;
            };
            let mask = inlier_mask(&candidate, correspondences, reproj_threshold);
            let count = mask.iter().filter(|&&b| b).count();
            if count > best_count {
                best_count = count;
                best_mask = Some(mask);
                if best_count == n {
                    break;
                }
            }
        }

        let best_mask = best_mask.filter(|_| best_count >= 4)?;

        // Refit on the consensus set for the final transform.
        let consensus: Vec<Correspondence> = correspondences
            .iter()
            .zip(&best_mask)
            .filter(|(_, &keep)| keep)
            .map(|(c, _)| *c)
            .collect();
        let refined = dlt(&consensus)?;
        let inliers = inlier_mask(&refined, correspondences, reproj_threshold);
        if inliers.iter().filter(|&&b| b).count() < 4 {
            return None;
        }

        Some(HomographyFit {
            homography: refined,
            inliers,
        })
    }
}

fn inlier_mask(
    h: &Homography,
    correspondences: &[Correspondence],
    threshold: f64,
) -> Vec<bool> {
    correspondences
        .iter()
        .map(|c| {
            let (px, py) = h.apply(c.frame.0 as f64, c.frame.1 as f64);
            let dx = px - c.template.0 as f64;
            let dy = py - c.template.1 as f64;
            (dx * dx + dy * dy).sqrt() <= threshold
        })
        .collect()
}

/// Four distinct indices in [0, n).
fn sample_four(rng: &mut XorShift64, n: usize) -> [usize; 4] {
    let mut out = [0usize; 4];
    let mut filled = 0;
    while filled < 4 {
        let idx = (rng.next() % n as u64) as usize;
        if !out[..filled].contains(&idx) {
            out[filled] = idx;
            filled += 1;
        }
    }
    out
}

/// Reject samples where any three frame points are (nearly) collinear.
fn sample_degenerate(sample: &[Correspondence]) -> bool {
    for i in 0..sample.len() {
        for j in (i + 1)..sample.len() {
            for k in (j + 1)..sample.len() {
                let (ax, ay) = sample[i].frame;
                let (bx, by) = sample[j].frame;
                let (cx, cy) = sample[k].frame;
                let area = ((bx - ax) as f64 * (cy - ay) as f64
                    - (cx - ax) as f64 * (by - ay) as f64)
                    .abs();
                if area < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

/// Normalized DLT homography fit over four or more correspondences.
fn dlt(correspondences: &[Correspondence]) -> Option<Homography> {
    if correspondences.len() < 4 {
        return None;
    }

    let src: Vec<(f64, f64)> = correspondences
        .iter()
        .map(|c| (c.frame.0 as f64, c.frame.1 as f64))
        .collect();
    let dst: Vec<(f64, f64)> = correspondences
        .iter()
        .map(|c| (c.template.0 as f64, c.template.1 as f64))
        .collect();

    let (t_src, src_n) = hartley_normalize(&src)?;
    let (t_dst, dst_n) = hartley_normalize(&dst)?;

    // Accumulate A^T A directly; its eigenvector for the smallest eigenvalue
    // is the least-squares null vector of the DLT system.
    let mut ata = Mat9::zeros();
    for ((x, y), (u, v)) in src_n.iter().zip(dst_n.iter()) {
        let r1 = [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, *u];
        let r2 = [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, *v];
        for a in 0..9 {
            for b in 0..9 {
                ata[(a, b)] += r1[a] * r1[b] + r2[a] * r2[b];
            }
        }
    }

    let eigen = ata.symmetric_eigen();
    let mut min_idx = 0;
    for i in 1..9 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let h = eigen.eigenvectors.column(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse()?;
    let mut m = t_dst_inv * hn * t_src;

    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }
    let scale = m[(2, 2)];
    if scale.abs() > 1e-12 {
        m /= scale;
    }

    Some(Homography { m })
}

/// Hartley normalization: translate the centroid to the origin and scale the
/// mean distance to sqrt(2). Returns `None` for degenerate (coincident)
/// point sets.
fn hartley_normalize(points: &[(f64, f64)]) -> Option<(Matrix3<f64>, Vec<(f64, f64)>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-9 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| (s * (p.0 - cx), s * (p.1 - cy)))
        .collect();
    Some((t, normalized))
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}

/// Inverse-mapping perspective warper with bilinear sampling. Pixels that map
/// outside the source image come out black, matching constant-border warps.
pub struct PerspectiveWarper;

impl ImageWarper for PerspectiveWarper {
    fn warp(
        &self,
        image: &GrayImage,
        homography: &Homography,
        out_w: u32,
        out_h: u32,
    ) -> GrayImage {
        let Some(inverse) = homography.inverse() else {
            return GrayImage::new(out_w, out_h);
        };

        let mut out = GrayImage::new(out_w, out_h);
        for y in 0..out_h {
            for x in 0..out_w {
                let (sx, sy) = inverse.apply(x as f64, y as f64);
                let v = bilinear(image, sx, sy);
                out.put_pixel(x, y, Luma([v]));
            }
        }
        out
    }
}

fn bilinear(image: &GrayImage, x: f64, y: f64) -> u8 {
    let (w, h) = image.dimensions();
    if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
        return 0;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    if x0 + 1 >= w || y0 + 1 >= h {
        // Edge pixels sample nearest to avoid reading out of bounds.
        if x0 < w && y0 < h {
            return image.get_pixel(x0, y0).0[0];
        }
        return 0;
    }
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p00 = image.get_pixel(x0, y0).0[0] as f64;
    let p10 = image.get_pixel(x0 + 1, y0).0[0] as f64;
    let p01 = image.get_pixel(x0, y0 + 1).0[0] as f64;
    let p11 = image.get_pixel(x0 + 1, y0 + 1).0[0] as f64;
    let top = p00 + (p10 - p00) * fx;
    let bottom = p01 + (p11 - p01) * fx;
    (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8
}
