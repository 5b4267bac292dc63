use image::{DynamicImage, GrayImage};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point as PixelPoint;
use tracing::{debug, info, instrument, warn};

use crate::error::{DeskewError, Result};
use crate::geometry::{is_convex, polygon_area, Point, Quadrilateral};

/// Tuning for the edge/contour card search.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Gaussian sigma applied before edge detection (1.1 is roughly a 5x5 kernel).
    pub blur_sigma: f32,
    /// Canny hysteresis thresholds.
    pub canny_low: f32,
    pub canny_high: f32,
    /// Edge dilation radius in pixels, closes small gaps in the card outline. 0 disables.
    pub dilation_radius: u8,
    /// Polygon simplification tolerance as a fraction of the contour perimeter.
    pub approx_tolerance: f64,
    /// Smallest accepted card area as a fraction of the image area.
    pub min_area_fraction: f64,
    /// Contours with fewer traced points are ignored outright.
    pub min_contour_points: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 75.0,
            canny_high: 200.0,
            dilation_radius: 1,
            approx_tolerance: 0.02,
            min_area_fraction: 0.10,
            min_contour_points: 16,
        }
    }
}

/// Blur and run Canny, then thicken the edges so the outline traces as one contour.
fn detect_edges(gray: &GrayImage, config: &DetectionConfig) -> GrayImage {
    let blurred = if config.blur_sigma > 0.0 {
        gaussian_blur_f32(gray, config.blur_sigma)
    } else {
        gray.clone()
    };

    let edges = canny(&blurred, config.canny_low, config.canny_high);
    if config.dilation_radius == 0 {
        edges
    } else {
        dilate(&edges, Norm::LInf, config.dilation_radius)
    }
}

fn squared_distance(a: PixelPoint<i32>, b: PixelPoint<i32>) -> i64 {
    let dx = (a.x - b.x) as i64;
    let dy = (a.y - b.y) as i64;
    dx * dx + dy * dy
}

fn farthest_from(points: &[PixelPoint<i32>], origin: PixelPoint<i32>) -> usize {
    points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| squared_distance(**p, origin))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Douglas-Peucker over a closed contour.
///
/// The contour is split at two mutually distant points, which are always
/// hull vertices, so the start of the trace never shows up as a fake corner.
fn approximate_closed(points: &[PixelPoint<i32>], epsilon: f64) -> Vec<PixelPoint<i32>> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let a = farthest_from(points, points[0]);
    let b = farthest_from(points, points[a]);
    if a == b {
        return vec![points[a]];
    }

    let rotated: Vec<PixelPoint<i32>> = points[a..].iter().chain(&points[..a]).copied().collect();
    let split = (b + n - a) % n;

    let first = &rotated[..=split];
    let second: Vec<PixelPoint<i32>> = rotated[split..]
        .iter()
        .copied()
        .chain(std::iter::once(rotated[0]))
        .collect();

    let mut polygon = approximate_polygon_dp(first, epsilon, false);
    polygon.pop();
    let mut rest = approximate_polygon_dp(&second, epsilon, false);
    rest.pop();
    polygon.extend(rest);
    polygon
}

/// A simplified contour that passed the vertex-count and convexity filters.
#[derive(Debug, Clone)]
struct Candidate {
    quad: Quadrilateral,
    area: f64,
}

fn to_candidate(
    contour: &[PixelPoint<i32>],
    config: &DetectionConfig,
) -> Option<Candidate> {
    if contour.len() < config.min_contour_points {
        return None;
    }

    let perimeter = arc_length(contour, true);
    if perimeter <= 0.0 {
        return None;
    }

    let polygon = approximate_closed(contour, config.approx_tolerance * perimeter);
    if polygon.len() != 4 {
        return None;
    }

    let corners: Vec<Point> = polygon
        .iter()
        .map(|p| Point::new(p.x as f64, p.y as f64))
        .collect();
    if !is_convex(&corners) {
        return None;
    }

    let area = polygon_area(&corners);
    let quad = Quadrilateral([corners[0], corners[1], corners[2], corners[3]]);
    Some(Candidate { quad, area })
}

/// Pull every vertex of a convex quad inward so each edge moves by `distance`.
///
/// The traced outline sits on the outside of the dilated edge band; this
/// brings it back onto the edge itself.
fn inset_quad(quad: &Quadrilateral, distance: f64) -> Quadrilateral {
    if distance <= 0.0 {
        return *quad;
    }

    let pts = quad.points();
    let mut inset = *pts;
    for i in 0..4 {
        let v = pts[i];
        let prev = pts[(i + 3) % 4];
        let next = pts[(i + 1) % 4];

        let (to_prev, to_next) = (v.distance(&prev), v.distance(&next));
        if to_prev < f64::EPSILON || to_next < f64::EPSILON {
            continue;
        }
        let u1 = ((prev.x - v.x) / to_prev, (prev.y - v.y) / to_prev);
        let u2 = ((next.x - v.x) / to_next, (next.y - v.y) / to_next);

        let bisector = (u1.0 + u2.0, u1.1 + u2.1);
        let len = bisector.0.hypot(bisector.1);
        let cos_angle = (u1.0 * u2.0 + u1.1 * u2.1).clamp(-1.0, 1.0);
        let sin_half = ((1.0 - cos_angle) / 2.0).sqrt();
        if len < 1e-9 || sin_half < 1e-9 {
            continue;
        }

        let shift = distance / sin_half;
        inset[i] = Point::new(
            v.x + bisector.0 / len * shift,
            v.y + bisector.1 / len * shift,
        );
    }
    Quadrilateral(inset)
}

/// Keep the largest candidate, provided it covers more than `min_area_fraction`
/// of the image.
fn select_card(
    candidates: impl IntoIterator<Item = Candidate>,
    image_area: f64,
    min_area_fraction: f64,
) -> Result<Candidate> {
    let best = candidates
        .into_iter()
        .fold(None::<Candidate>, |best, candidate| match best {
            Some(b) if b.area >= candidate.area => Some(b),
            _ => Some(candidate),
        });

    let min_area = image_area * min_area_fraction;
    match best {
        Some(candidate) if candidate.area > min_area => {
            info!(
                area = candidate.area,
                fraction = candidate.area / image_area,
                "card boundary found"
            );
            Ok(candidate)
        }
        Some(candidate) => {
            warn!(
                area = candidate.area,
                min_area, "largest quadrilateral is too small to be the card"
            );
            Err(DeskewError::NoCardFound)
        }
        None => {
            warn!("no four-sided contour found");
            Err(DeskewError::NoCardFound)
        }
    }
}

/// Find the quadrilateral most likely to be the card outline.
///
/// Returns [`DeskewError::NoCardFound`] when no convex four-sided contour
/// covers more than `min_area_fraction` of the image.
#[instrument(skip(image, config), fields(width = image.width(), height = image.height()))]
pub fn detect_card(image: &DynamicImage, config: &DetectionConfig) -> Result<Quadrilateral> {
    let gray = image.to_luma8();
    let edges = detect_edges(&gray, config);

    let contours = find_contours::<i32>(&edges);
    debug!(contours = contours.len(), "contours traced");

    let candidates = contours
        .iter()
        .filter_map(|contour| to_candidate(&contour.points, config));

    let image_area = image.width() as f64 * image.height() as f64;
    let card = select_card(candidates, image_area, config.min_area_fraction)?;
    Ok(inset_quad(&card.quad, config.dilation_radius as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};
    use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
    use imageproc::rect::Rect;

    fn card_on_background(width: u32, height: u32, corners: &[(i32, i32)]) -> DynamicImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([40, 40, 40]));
        let poly: Vec<PixelPoint<i32>> =
            corners.iter().map(|&(x, y)| PixelPoint::new(x, y)).collect();
        draw_polygon_mut(&mut img, &poly, Rgb([235, 235, 235]));
        DynamicImage::ImageRgb8(img)
    }

    fn assert_corners_near(quad: &Quadrilateral, truth: &[(i32, i32)], tolerance: f64) {
        for &(tx, ty) in truth {
            let target = Point::new(tx as f64, ty as f64);
            let nearest = quad
                .points()
                .iter()
                .map(|p| p.distance(&target))
                .fold(f64::INFINITY, f64::min);
            assert!(
                nearest <= tolerance,
                "corner ({tx}, {ty}) missed by {nearest:.2}px in {quad:?}"
            );
        }
    }

    #[test]
    fn test_uniform_image_has_no_card() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 150, Luma([128])));
        let result = detect_card(&img, &DetectionConfig::default());
        assert!(matches!(result, Err(DeskewError::NoCardFound)));
    }

    #[test]
    fn test_recovers_skewed_quadrilateral() {
        let truth = [(60, 50), (330, 70), (320, 250), (80, 235)];
        let img = card_on_background(400, 300, &truth);

        let quad = detect_card(&img, &DetectionConfig::default()).unwrap();
        assert_corners_near(&quad, &truth, 5.0);
    }

    #[test]
    fn test_recovers_axis_aligned_rectangle() {
        let truth = [(50, 40), (250, 40), (250, 160), (50, 160)];
        let img = card_on_background(300, 200, &truth);

        let quad = detect_card(&img, &DetectionConfig::default()).unwrap();
        assert_corners_near(&quad, &truth, 5.0);
    }

    #[test]
    fn test_small_quadrilateral_is_rejected() {
        let truth = [(10, 10), (40, 10), (40, 30), (10, 30)];
        let img = card_on_background(400, 300, &truth);
        let result = detect_card(&img, &DetectionConfig::default());
        assert!(matches!(result, Err(DeskewError::NoCardFound)));
    }

    #[test]
    fn test_triangle_is_not_a_card() {
        let truth = [(50, 250), (200, 30), (350, 250)];
        let img = card_on_background(400, 300, &truth);
        let result = detect_card(&img, &DetectionConfig::default());
        assert!(matches!(result, Err(DeskewError::NoCardFound)));
    }

    fn rect_candidate(x0: f64, y0: f64, x1: f64, y1: f64) -> Candidate {
        let quad = Quadrilateral([
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]);
        Candidate {
            area: quad.area(),
            quad,
        }
    }

    #[test]
    fn test_largest_candidate_wins() {
        let outer = rect_candidate(10.0, 10.0, 90.0, 70.0);
        let inner = rect_candidate(30.0, 20.0, 70.0, 60.0);
        let picked = select_card(vec![inner, outer.clone()], 100.0 * 80.0, 0.1).unwrap();
        assert_eq!(picked.quad, outer.quad);
    }

    #[test]
    fn test_area_must_exceed_floor() {
        // 20x40 = 800 = exactly 10% of 100x80.
        let at_floor = rect_candidate(0.0, 0.0, 20.0, 40.0);
        let result = select_card(vec![at_floor], 100.0 * 80.0, 0.1);
        assert!(matches!(result, Err(DeskewError::NoCardFound)));

        let above = rect_candidate(0.0, 0.0, 21.0, 40.0);
        assert!(select_card(vec![above], 100.0 * 80.0, 0.1).is_ok());
    }

    #[test]
    fn test_inset_moves_square_corners_diagonally() {
        let square = rect_candidate(0.0, 0.0, 10.0, 10.0).quad;
        let inset = inset_quad(&square, 1.0);
        let expected = [(1.0, 1.0), (9.0, 1.0), (9.0, 9.0), (1.0, 9.0)];
        for (p, (ex, ey)) in inset.points().iter().zip(expected) {
            assert!(p.distance(&Point::new(ex, ey)) < 1e-9, "{p:?}");
        }
        assert_eq!(inset_quad(&square, 0.0), square);
    }

    #[test]
    fn test_card_with_inner_panel_keeps_outer_outline() {
        let truth = [(80, 60), (520, 80), (510, 340), (90, 330)];
        let mut img = RgbImage::from_pixel(600, 400, Rgb([40, 40, 40]));
        let poly: Vec<PixelPoint<i32>> =
            truth.iter().map(|&(x, y)| PixelPoint::new(x, y)).collect();
        draw_polygon_mut(&mut img, &poly, Rgb([235, 235, 235]));
        // Photo panel: 200x150 = 30000 px, above the 10% floor of 24000.
        draw_filled_rect_mut(&mut img, Rect::at(200, 140).of_size(200, 150), Rgb([70, 70, 70]));
        let img = DynamicImage::ImageRgb8(img);

        let quad = detect_card(&img, &DetectionConfig::default()).unwrap();
        assert_corners_near(&quad, &truth, 4.0);
    }

    #[test]
    fn test_corners_sit_on_the_edge_not_outside_it() {
        let truth = [(50, 40), (250, 40), (250, 160), (50, 160)];
        let img = card_on_background(300, 200, &truth);

        let quad = detect_card(&img, &DetectionConfig::default()).unwrap();
        let xs = (*quad.points()).map(|p| p.x);
        let ys = (*quad.points()).map(|p| p.y);
        let span = |v: [f64; 4]| {
            v.iter().copied().fold(f64::MIN, f64::max) - v.iter().copied().fold(f64::MAX, f64::min)
        };
        // The outline of the dilated edge band is 2 px wider and taller.
        assert!((span(xs) - 200.0).abs() < 1.5, "width {}", span(xs));
        assert!((span(ys) - 120.0).abs() < 1.5, "height {}", span(ys));
    }

    #[test]
    fn test_closed_approximation_ignores_trace_start() {
        // Square traced starting in the middle of the top edge.
        let mut contour = Vec::new();
        for x in 50..=100 {
            contour.push(PixelPoint::new(x, 0));
        }
        for y in 1..=100 {
            contour.push(PixelPoint::new(100, y));
        }
        for x in (0..100).rev() {
            contour.push(PixelPoint::new(x, 100));
        }
        for y in (0..100).rev() {
            contour.push(PixelPoint::new(0, y));
        }
        for x in 1..50 {
            contour.push(PixelPoint::new(x, 0));
        }

        let polygon = approximate_closed(&contour, 4.0);
        assert_eq!(polygon.len(), 4, "{polygon:?}");
    }
}
