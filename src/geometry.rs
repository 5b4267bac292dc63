use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use tracing::{debug, instrument};

use crate::error::{DeskewError, Result};

/// Triples of corners whose triangle area falls below this fraction of the
/// squared quad extent are treated as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-4;

/// A floating-point pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Four corner points in detection order (not yet labelled).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral(pub [Point; 4]);

impl Quadrilateral {
    pub fn points(&self) -> &[Point; 4] {
        &self.0
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// Enclosed area, independent of winding.
    pub fn area(&self) -> f64 {
        polygon_area(&self.0)
    }
}

/// Corners labelled in canonical clockwise order (image y grows downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedCorners {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl OrderedCorners {
    pub fn to_array(&self) -> [Point; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Target rectangle size: the longer of each pair of opposing edges.
    pub fn output_size(&self) -> (u32, u32) {
        let top = self.top_left.distance(&self.top_right);
        let bottom = self.bottom_left.distance(&self.bottom_right);
        let left = self.top_left.distance(&self.bottom_left);
        let right = self.top_right.distance(&self.bottom_right);

        let width = top.max(bottom).round().max(1.0) as u32;
        let height = left.max(right).round().max(1.0) as u32;
        (width, height)
    }
}

/// Shoelace area of a closed polygon (absolute value).
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: f64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}

/// True if every turn of the closed polygon goes the same way.
pub fn is_convex(points: &[Point]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }

    let mut sign = 0.0_f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < f64::EPSILON {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

/// Transform a point through a homogeneous 3x3 matrix.
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

/// Projective mapping from the source quad onto an upright
/// `width` x `height` rectangle anchored at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveTransform {
    /// Source -> destination.
    pub matrix: Matrix3<f64>,
    pub width: u32,
    pub height: u32,
}

impl PerspectiveTransform {
    pub fn apply(&self, p: Point) -> Point {
        transform_point(&self.matrix, p.x, p.y).into()
    }

    pub fn inverse(&self) -> Option<Matrix3<f64>> {
        self.matrix.try_inverse()
    }
}

/// Size the output rectangle and solve the homography that flattens `corners` onto it.
#[instrument(level = "debug", skip_all)]
pub fn resolve_perspective(corners: &OrderedCorners) -> Result<PerspectiveTransform> {
    let src = corners.to_array();
    ensure_not_collinear(&src)?;

    let (width, height) = corners.output_size();
    let (w, h) = (width as f64, height as f64);
    let dst = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ];

    let matrix = homography_from_points(&src, &dst).ok_or_else(|| {
        DeskewError::SingularTransform("homography linear system has no unique solution".into())
    })?;

    if matrix.try_inverse().is_none() {
        return Err(DeskewError::SingularTransform(
            "homography is not invertible".into(),
        ));
    }

    debug!(width, height, "perspective transform resolved");
    Ok(PerspectiveTransform {
        matrix,
        width,
        height,
    })
}

fn ensure_not_collinear(points: &[Point; 4]) -> Result<()> {
    let (min_x, max_x, min_y, max_y) = points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(lx, hx, ly, hy), p| (lx.min(p.x), hx.max(p.x), ly.min(p.y), hy.max(p.y)),
    );
    let extent = (max_x - min_x).max(max_y - min_y);
    if extent < 1.0 {
        return Err(DeskewError::SingularTransform(format!(
            "corners span only {extent:.3} px"
        )));
    }

    let threshold = COLLINEAR_TOLERANCE * extent * extent;
    for skip in 0..4 {
        let tri: Vec<Point> = (0..4).filter(|&i| i != skip).map(|i| points[i]).collect();
        let area = polygon_area(&tri);
        if area < threshold {
            return Err(DeskewError::SingularTransform(format!(
                "three corners are collinear (triangle area {area:.3})"
            )));
        }
    }
    Ok(())
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance to sqrt(2).
fn normalization(points: &[Point; 4]) -> Matrix3<f64> {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| (p.x - cx).hypot(p.y - cy))
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    Matrix3::new(
        s, 0.0, -s * cx,
        0.0, s, -s * cy,
        0.0, 0.0, 1.0,
    )
}

/// Solve the 8-unknown system for `h` (with h33 = 1) such that `dst ~ H * src`.
fn homography_from_points(src: &[Point; 4], dst: &[Point; 4]) -> Option<Matrix3<f64>> {
    let t_src = normalization(src);
    let t_dst = normalization(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = transform_point(&t_src, src[i].x, src[i].y);
        let (u, v) = transform_point(&t_dst, dst[i].x, dst[i].y);

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let normalized = Matrix3::new(
        h[0], h[1], h[2],
        h[3], h[4], h[5],
        h[6], h[7], 1.0,
    );

    let denormalized = t_dst.try_inverse()? * normalized * t_src;
    let scale = denormalized[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(denormalized / scale)
}
